use migrate_logging::{migrate_debug, migrate_info};
use migrator_core::{
    classify_default, is_rate_limit_signature, ErrorClass, RawError, RawErrorKind,
    DEFAULT_RATE_LIMIT_RESET,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::http::{build_client, map_reqwest_error, read_json, reset_hint, HttpSettings};

pub const GITHUB_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

const REPOSITORY_QUERY: &str = r#"query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    id
    hasDiscussionsEnabled
    discussionCategories(first: 100) { nodes { id name } }
  }
}"#;

const CREATE_DISCUSSION: &str = r#"mutation($input: CreateDiscussionInput!) {
  createDiscussion(input: $input) { discussion { id number url } }
}"#;

const ADD_COMMENT: &str = r#"mutation($input: AddDiscussionCommentInput!) {
  addDiscussionComment(input: $input) { comment { id } }
}"#;

/// GraphQL error types that will not go away on retry.
const PERMANENT_API_CODES: &[&str] = &[
    "NOT_FOUND",
    "FORBIDDEN",
    "UNPROCESSABLE",
    "INVALID_INPUT",
    "DISCUSSIONS_DISABLED",
    "UNKNOWN_CATEGORY",
];

/// The first message of a unit creates this; later ones attach to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub number: u64,
    pub url: Option<String>,
}

/// Where converted messages are published.
#[async_trait::async_trait]
pub trait DestinationPublisher: Send + Sync {
    /// Confirms the target exists and accepts new containers.
    async fn verify_target(&self, category_id: &str) -> Result<(), RawError>;

    async fn create_container(
        &self,
        title: &str,
        body: &str,
        category_id: &str,
    ) -> Result<ContainerRef, RawError>;

    async fn add_child(&self, container_id: &str, body: &str) -> Result<(), RawError>;

    fn classify(&self, err: &RawError) -> ErrorClass {
        classify_default(err)
    }
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub endpoint: String,
    pub token: String,
    /// `owner/name`.
    pub repository: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DiscussionCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub id: String,
    pub discussions_enabled: bool,
    pub categories: Vec<DiscussionCategory>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryData {
    repository: Option<WireRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRepository {
    id: String,
    has_discussions_enabled: bool,
    discussion_categories: CategoryConnection,
}

#[derive(Debug, Deserialize)]
struct CategoryConnection {
    #[serde(default)]
    nodes: Vec<DiscussionCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDiscussionData {
    create_discussion: Option<DiscussionPayload>,
}

#[derive(Debug, Deserialize)]
struct DiscussionPayload {
    discussion: WireDiscussion,
}

#[derive(Debug, Deserialize)]
struct WireDiscussion {
    id: String,
    number: u64,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentData {
    add_discussion_comment: Option<Value>,
}

fn invalid_input(message: impl Into<String>) -> RawError {
    RawError::new(RawErrorKind::Api("INVALID_INPUT".into()), message)
}

/// GitHub Discussions over the GraphQL API.
#[derive(Debug)]
pub struct GitHubDiscussions {
    settings: GitHubSettings,
    client: reqwest::Client,
    repository: OnceCell<RepositoryInfo>,
}

impl GitHubDiscussions {
    pub fn new(settings: GitHubSettings, http: HttpSettings) -> Result<Self, RawError> {
        let client = build_client(&http)?;
        Ok(Self {
            settings,
            client,
            repository: OnceCell::new(),
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, RawError> {
        let payload = serde_json::to_vec(&json!({ "query": query, "variables": variables }))
            .map_err(|err| invalid_input(format!("cannot encode request: {err}")))?;
        let response = self
            .client
            .post(self.settings.endpoint.as_str())
            .header(AUTHORIZATION, format!("bearer {}", self.settings.token))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let retry_after = reset_hint(response.headers());
        let envelope: GraphQlResponse<T> = read_json(response).await?;

        if let Some(first) = envelope.errors.first() {
            let code = first.kind.clone().unwrap_or_else(|| "GRAPHQL".to_string());
            let message = envelope
                .errors
                .iter()
                .map(|err| err.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RawError::new(RawErrorKind::Api(code), message).with_retry_after(retry_after));
        }
        envelope
            .data
            .ok_or_else(|| RawError::new(RawErrorKind::Decode, "GraphQL response without data"))
    }

    /// Repository id and discussion categories, fetched once per client.
    pub async fn repository_info(&self) -> Result<&RepositoryInfo, RawError> {
        self.repository
            .get_or_try_init(|| async {
                let (owner, name) = self
                    .settings
                    .repository
                    .split_once('/')
                    .ok_or_else(|| invalid_input("repository must be shaped owner/name"))?;
                let data: RepositoryData = self
                    .graphql(REPOSITORY_QUERY, json!({ "owner": owner, "name": name }))
                    .await?;
                let repository = data.repository.ok_or_else(|| {
                    RawError::new(
                        RawErrorKind::Api("NOT_FOUND".into()),
                        format!("repository {} not found", self.settings.repository),
                    )
                })?;
                migrate_debug!(
                    "Repository {} has {} discussion categories",
                    self.settings.repository,
                    repository.discussion_categories.nodes.len()
                );
                Ok::<_, RawError>(RepositoryInfo {
                    id: repository.id,
                    discussions_enabled: repository.has_discussions_enabled,
                    categories: repository.discussion_categories.nodes,
                })
            })
            .await
    }
}

#[async_trait::async_trait]
impl DestinationPublisher for GitHubDiscussions {
    async fn verify_target(&self, category_id: &str) -> Result<(), RawError> {
        let info = self.repository_info().await?;
        if !info.discussions_enabled {
            return Err(RawError::new(
                RawErrorKind::Api("DISCUSSIONS_DISABLED".into()),
                format!("discussions are not enabled for {}", self.settings.repository),
            ));
        }
        match info.categories.iter().find(|category| category.id == category_id) {
            Some(category) => {
                migrate_info!("Target category: {} ({})", category.name, category.id);
                Ok(())
            }
            None => Err(RawError::new(
                RawErrorKind::Api("UNKNOWN_CATEGORY".into()),
                format!(
                    "category {category_id} does not exist in {}",
                    self.settings.repository
                ),
            )),
        }
    }

    async fn create_container(
        &self,
        title: &str,
        body: &str,
        category_id: &str,
    ) -> Result<ContainerRef, RawError> {
        if title.trim().is_empty() {
            return Err(invalid_input("discussion title is empty"));
        }
        if body.trim().is_empty() {
            return Err(invalid_input("discussion body is empty"));
        }
        let repository_id = self.repository_info().await?.id.clone();
        let input = json!({
            "repositoryId": repository_id,
            "categoryId": category_id,
            "title": title,
            "body": body,
        });
        let data: CreateDiscussionData = self
            .graphql(CREATE_DISCUSSION, json!({ "input": input }))
            .await?;
        let discussion = data
            .create_discussion
            .ok_or_else(|| RawError::new(RawErrorKind::Decode, "createDiscussion returned nothing"))?
            .discussion;
        Ok(ContainerRef {
            id: discussion.id,
            number: discussion.number,
            url: discussion.url,
        })
    }

    async fn add_child(&self, container_id: &str, body: &str) -> Result<(), RawError> {
        if container_id.trim().is_empty() {
            return Err(invalid_input("discussion id is empty"));
        }
        if body.trim().is_empty() {
            return Err(invalid_input("comment body is empty"));
        }
        let input = json!({ "discussionId": container_id, "body": body });
        let data: AddCommentData = self.graphql(ADD_COMMENT, json!({ "input": input })).await?;
        data.add_discussion_comment
            .map(|_| ())
            .ok_or_else(|| RawError::new(RawErrorKind::Decode, "addDiscussionComment returned nothing"))
    }

    fn classify(&self, err: &RawError) -> ErrorClass {
        if let RawErrorKind::Api(code) = &err.kind {
            if code == "RATE_LIMITED" {
                return ErrorClass::RateLimited {
                    reset_after: err.retry_after.unwrap_or(DEFAULT_RATE_LIMIT_RESET),
                };
            }
            if PERMANENT_API_CODES.contains(&code.as_str()) && !is_rate_limit_signature(&err.message) {
                return ErrorClass::Permanent;
            }
        }
        classify_default(err)
    }
}
