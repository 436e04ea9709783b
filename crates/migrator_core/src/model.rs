use url::Url;

pub type ThreadId = u64;
pub type PostId = u64;

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// A top-level forum thread, migrated as one resumable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub id: ThreadId,
    pub title: String,
    pub category_id: u64,
    pub author: String,
    /// Unix seconds.
    pub created_at: i64,
    pub reply_count: u32,
}

/// A post belonging to a [`WorkUnit`], in thread order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildItem {
    pub id: PostId,
    pub unit_id: ThreadId,
    pub author: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Raw BB-code body.
    pub body: String,
    pub attachments: Vec<FileRef>,
}

/// An attachment embedded in a post. The filename is untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub id: u64,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FileRefError {
    #[error("attachment id must be positive")]
    ZeroId,
    #[error("attachment {0} has an empty filename")]
    EmptyFilename(u64),
    #[error("attachment {id} has an invalid url {url:?}")]
    InvalidUrl { id: u64, url: String },
    #[error("attachment {id} uses disallowed scheme {scheme:?}")]
    DisallowedScheme { id: u64, scheme: String },
}

impl FileRef {
    pub fn new(id: u64, filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            url: url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), FileRefError> {
        if self.id == 0 {
            return Err(FileRefError::ZeroId);
        }
        if self.filename.trim().is_empty() {
            return Err(FileRefError::EmptyFilename(self.id));
        }
        let parsed = Url::parse(&self.url).map_err(|_| FileRefError::InvalidUrl {
            id: self.id,
            url: self.url.clone(),
        })?;
        if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Err(FileRefError::DisallowedScheme {
                id: self.id,
                scheme: parsed.scheme().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FileRef, FileRefError};

    #[test]
    fn valid_attachment_passes() {
        let file = FileRef::new(3, "a.png", "https://forum.example/attachments/3");
        assert_eq!(file.validate(), Ok(()));
    }

    #[test]
    fn zero_id_and_blank_name_are_rejected() {
        assert_eq!(
            FileRef::new(0, "a.png", "https://x.example/a").validate(),
            Err(FileRefError::ZeroId)
        );
        assert_eq!(
            FileRef::new(4, "  ", "https://x.example/a").validate(),
            Err(FileRefError::EmptyFilename(4))
        );
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let err = FileRef::new(5, "a.png", "file:///etc/passwd")
            .validate()
            .unwrap_err();
        assert!(matches!(err, FileRefError::DisallowedScheme { id: 5, .. }));

        let err = FileRef::new(6, "a.png", "not a url").validate().unwrap_err();
        assert!(matches!(err, FileRefError::InvalidUrl { id: 6, .. }));
    }
}
