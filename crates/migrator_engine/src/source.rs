use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use migrate_logging::{migrate_debug, migrate_info};
use migrator_core::{
    classify_default, ChildItem, ErrorClass, FileRef, RawError, RawErrorKind, WorkUnit,
};
use serde::Deserialize;
use tempfile::NamedTempFile;
use url::Url;

use crate::http::{build_client, map_reqwest_error, read_json, status_error, HttpSettings};

/// Where threads, posts and attachment bytes come from.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Cheap authenticated request proving the credentials work.
    async fn ping(&self) -> Result<(), RawError>;

    /// Every thread in `node_id`, across all pages.
    async fn list_work_units(&self, node_id: u64) -> Result<Vec<WorkUnit>, RawError>;

    /// Every post of `unit` in thread order, the opening post first.
    async fn list_children(&self, unit: &WorkUnit) -> Result<Vec<ChildItem>, RawError>;

    /// Stores the body at `url` in `dest`, returning the byte count. On error
    /// nothing is left at `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RawError>;

    fn classify(&self, err: &RawError) -> ErrorClass {
        classify_default(err)
    }
}

#[derive(Debug, Clone)]
pub struct XenForoSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_user: String,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    current_page: u32,
    #[serde(default)]
    total_pages: u32,
}

impl Pagination {
    fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }
}

#[derive(Debug, Deserialize)]
struct ThreadsPage {
    #[serde(default)]
    threads: Vec<WireThread>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct WireThread {
    thread_id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    node_id: u64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    post_date: i64,
    #[serde(default)]
    reply_count: u32,
}

#[derive(Debug, Deserialize)]
struct PostsPage {
    #[serde(default)]
    posts: Vec<WirePost>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct WirePost {
    post_id: u64,
    #[serde(default)]
    thread_id: u64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    post_date: i64,
    #[serde(default)]
    message: String,
    #[serde(rename = "Attachments", default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    attachment_id: u64,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    direct_url: String,
}

impl From<WireThread> for WorkUnit {
    fn from(thread: WireThread) -> Self {
        WorkUnit {
            id: thread.thread_id,
            title: thread.title,
            category_id: thread.node_id,
            author: thread.username,
            created_at: thread.post_date,
            reply_count: thread.reply_count,
        }
    }
}

impl WirePost {
    fn into_child(self, unit_id: u64) -> ChildItem {
        ChildItem {
            id: self.post_id,
            unit_id: if self.thread_id == 0 { unit_id } else { self.thread_id },
            author: self.username,
            created_at: self.post_date,
            body: self.message,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| FileRef::new(a.attachment_id, a.filename, a.direct_url))
                .collect(),
        }
    }
}

/// XenForo REST API client.
#[derive(Debug, Clone)]
pub struct XenForoClient {
    settings: XenForoSettings,
    http: HttpSettings,
    client: reqwest::Client,
}

impl XenForoClient {
    pub fn new(settings: XenForoSettings, http: HttpSettings) -> Result<Self, RawError> {
        let client = build_client(&http)?;
        Ok(Self {
            settings,
            http,
            client,
        })
    }

    fn endpoint(&self, path: &str, page: Option<u32>) -> Result<Url, RawError> {
        let joined = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&joined).map_err(|err| {
            RawError::new(
                RawErrorKind::Api("INVALID_URL".into()),
                format!("invalid API url {joined:?}: {err}"),
            )
        })?;
        if let Some(page) = page {
            url.query_pairs_mut().append_pair("page", &page.to_string());
        }
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("XF-Api-Key", &self.settings.api_key)
            .header("XF-Api-User", &self.settings.api_user)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RawError> {
        let response = self.get(url).send().await.map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn between_pages(&self) {
        if !self.settings.page_delay.is_zero() {
            tokio::time::sleep(self.settings.page_delay).await;
        }
    }
}

#[async_trait::async_trait]
impl SourceFetcher for XenForoClient {
    async fn ping(&self) -> Result<(), RawError> {
        let response = self
            .get(self.endpoint("", None)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    async fn list_work_units(&self, node_id: u64) -> Result<Vec<WorkUnit>, RawError> {
        let mut units = Vec::new();
        let mut page = 1;
        loop {
            let url = self.endpoint(&format!("forums/{node_id}/threads"), Some(page))?;
            let batch: ThreadsPage = self.get_json(url).await?;
            migrate_debug!(
                "Node {node_id}: page {}/{} with {} threads",
                batch.pagination.current_page,
                batch.pagination.total_pages,
                batch.threads.len()
            );
            let done = batch.threads.is_empty() || !batch.pagination.has_more();
            units.extend(batch.threads.into_iter().map(WorkUnit::from));
            if done {
                break;
            }
            page += 1;
            self.between_pages().await;
        }
        migrate_info!("Found {} threads in node {node_id}", units.len());
        Ok(units)
    }

    async fn list_children(&self, unit: &WorkUnit) -> Result<Vec<ChildItem>, RawError> {
        let mut children = Vec::new();
        let mut page = 1;
        loop {
            let url = self.endpoint(&format!("threads/{}/posts", unit.id), Some(page))?;
            let batch: PostsPage = self.get_json(url).await?;
            let done = batch.posts.is_empty() || !batch.pagination.has_more();
            children.extend(batch.posts.into_iter().map(|post| post.into_child(unit.id)));
            if done {
                break;
            }
            page += 1;
            self.between_pages().await;
        }
        Ok(children)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RawError> {
        let parsed = Url::parse(url).map_err(|err| {
            RawError::new(RawErrorKind::Api("INVALID_URL".into()), format!("invalid download url: {err}"))
        })?;
        let response = self.get(parsed).send().await.map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let max_bytes = self.http.max_download_bytes;
        let too_large = |actual: u64| {
            RawError::new(
                RawErrorKind::Status(413),
                format!("attachment is {actual} bytes, limit is {max_bytes}"),
            )
        };
        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(too_large(declared));
            }
        }

        let io_error = |err: std::io::Error| RawError::new(RawErrorKind::Io, err.to_string());
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(too_large(written));
            }
            tmp.write_all(&chunk).map_err(io_error)?;
        }
        tmp.flush().map_err(io_error)?;
        tmp.persist(dest).map_err(|err| io_error(err.error))?;
        Ok(written)
    }
}
