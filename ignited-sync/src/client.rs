//! Upstream CI server client
//!
//! Abstraction over the upstream REST endpoints the mirror consumes:
//! paginated build listings, build detail, test/problem/statistic/change
//! lookups, build triggering and the build-type listing. The trait seam
//! exists so sync logic tests against mock upstreams.

use crate::dto::{
    BuildDto, BuildListDto, BuildTypeDto, ChangeDto, ChangesDto, ProblemOccurrenceDto,
    ProblemOccurrencesDto, StatisticPropertyDto, StatisticsDto, TestOccurrencesDto,
};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use ignited_core::{BuildId, ServerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Write as _;

/// Locator-style scoping of a build listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildLocator {
    pub build_type: Option<String>,
    pub branch: Option<String>,
}

impl BuildLocator {
    /// Unscoped locator: every build the server will list.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn build_type(build_type: impl Into<String>) -> Self {
        BuildLocator {
            build_type: Some(build_type.into()),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Render the upstream locator string for one page.
    pub fn to_locator(&self, start: usize, count: usize) -> String {
        let mut locator = String::from("defaultFilter:false,state:any");
        if let Some(bt) = &self.build_type {
            let _ = write!(locator, ",buildType:(id:{bt})");
        }
        if let Some(branch) = &self.branch {
            let _ = write!(locator, ",branch:(name:{branch})");
        }
        let _ = write!(locator, ",start:{start},count:{count}");
        locator
    }
}

/// A trigger request for a new build.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TriggerBuildRequest {
    pub build_type: String,
    pub branch: Option<String>,
    /// Force a clean checkout/rebuild
    pub clean_rebuild: bool,
    /// Put the build at the top of the queue
    pub queue_at_top: bool,
    pub parameters: HashMap<String, String>,
    pub comment: Option<String>,
}

/// Wire body for the trigger POST.
#[derive(Debug, Serialize)]
struct TriggerBodyDto<'a> {
    #[serde(rename = "buildType")]
    build_type: TriggerBuildTypeDto<'a>,
    #[serde(rename = "branchName", skip_serializing_if = "Option::is_none")]
    branch_name: Option<&'a str>,
    #[serde(rename = "cleanSources")]
    clean_sources: bool,
    #[serde(rename = "queueAtTop")]
    queue_at_top: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<TriggerCommentDto<'a>>,
    properties: TriggerPropertiesDto,
}

#[derive(Debug, Serialize)]
struct TriggerBuildTypeDto<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct TriggerCommentDto<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct TriggerPropertiesDto {
    property: Vec<TriggerPropertyDto>,
}

#[derive(Debug, Serialize)]
struct TriggerPropertyDto {
    name: String,
    value: String,
}

/// Client for one upstream CI server.
#[async_trait]
pub trait TeamcityClient: Debug + Send + Sync {
    /// One page of the build-reference listing, newest first.
    async fn builds_page(
        &self,
        locator: &BuildLocator,
        start: usize,
        count: usize,
    ) -> Result<BuildListDto>;

    /// Full build detail by id. `SyncError::NotFound` when upstream no
    /// longer knows the id.
    async fn build(&self, id: BuildId) -> Result<BuildDto>;

    /// One page of a build's test occurrences.
    async fn test_occurrences_page(
        &self,
        id: BuildId,
        start: usize,
        count: usize,
    ) -> Result<TestOccurrencesDto>;

    /// All problem occurrences of a build.
    async fn problem_occurrences(&self, id: BuildId) -> Result<Vec<ProblemOccurrenceDto>>;

    /// All statistics of a build.
    async fn build_statistics(&self, id: BuildId) -> Result<Vec<StatisticPropertyDto>>;

    /// All VCS changes of a build.
    async fn build_changes(&self, id: BuildId) -> Result<Vec<ChangeDto>>;

    /// Queue a new build; returns the queued build (with its
    /// snapshot-dependency ids).
    async fn trigger_build(&self, request: &TriggerBuildRequest) -> Result<BuildDto>;

    /// The server's build-type listing.
    async fn build_types(&self) -> Result<Vec<BuildTypeDto>>;
}

/// HTTP implementation over the upstream REST API.
#[derive(Debug)]
pub struct HttpTeamcityClient {
    base_url: String,
    http: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpTeamcityClient {
    /// Build a client from a server config (timeouts, auth).
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            auth_token: config.token.clone(),
        })
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(reqwest::header::ACCEPT, "application/json");
        if let Some(ref token) = self.auth_token {
            req.bearer_auth(token)
        } else {
            req
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T> {
        let resp = self.add_auth(self.http.get(&url)).send().await?;
        match resp.status().as_u16() {
            200 => Ok(resp.json().await?),
            404 => Err(SyncError::NotFound(url)),
            status => Err(SyncError::Upstream(format!(
                "Unexpected status {status} from {url}"
            ))),
        }
    }
}

#[async_trait]
impl TeamcityClient for HttpTeamcityClient {
    async fn builds_page(
        &self,
        locator: &BuildLocator,
        start: usize,
        count: usize,
    ) -> Result<BuildListDto> {
        let url = format!(
            "{}/app/rest/builds?locator={}",
            self.base_url,
            locator.to_locator(start, count)
        );
        self.get_json(url).await
    }

    async fn build(&self, id: BuildId) -> Result<BuildDto> {
        let url = format!("{}/app/rest/builds/id:{}", self.base_url, id);
        self.get_json(url).await
    }

    async fn test_occurrences_page(
        &self,
        id: BuildId,
        start: usize,
        count: usize,
    ) -> Result<TestOccurrencesDto> {
        let url = format!(
            "{}/app/rest/testOccurrences?locator=build:(id:{}),start:{},count:{}",
            self.base_url, id, start, count
        );
        self.get_json(url).await
    }

    async fn problem_occurrences(&self, id: BuildId) -> Result<Vec<ProblemOccurrenceDto>> {
        let url = format!(
            "{}/app/rest/problemOccurrences?locator=build:(id:{})",
            self.base_url, id
        );
        let container: ProblemOccurrencesDto = self.get_json(url).await?;
        Ok(container.problems)
    }

    async fn build_statistics(&self, id: BuildId) -> Result<Vec<StatisticPropertyDto>> {
        let url = format!("{}/app/rest/builds/id:{}/statistics", self.base_url, id);
        let container: StatisticsDto = self.get_json(url).await?;
        Ok(container.properties)
    }

    async fn build_changes(&self, id: BuildId) -> Result<Vec<ChangeDto>> {
        let url = format!(
            "{}/app/rest/changes?locator=build:(id:{})",
            self.base_url, id
        );
        let container: ChangesDto = self.get_json(url).await?;
        Ok(container.changes)
    }

    async fn trigger_build(&self, request: &TriggerBuildRequest) -> Result<BuildDto> {
        let url = format!("{}/app/rest/buildQueue", self.base_url);
        let body = TriggerBodyDto {
            build_type: TriggerBuildTypeDto {
                id: &request.build_type,
            },
            branch_name: request.branch.as_deref(),
            clean_sources: request.clean_rebuild,
            queue_at_top: request.queue_at_top,
            comment: request
                .comment
                .as_deref()
                .map(|text| TriggerCommentDto { text }),
            properties: TriggerPropertiesDto {
                property: request
                    .parameters
                    .iter()
                    .map(|(name, value)| TriggerPropertyDto {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            },
        };

        let resp = self
            .add_auth(self.http.post(&url))
            .json(&body)
            .send()
            .await?;
        match resp.status().as_u16() {
            200 | 201 => Ok(resp.json().await?),
            status => Err(SyncError::Upstream(format!(
                "Trigger failed with status {status} for {}",
                request.build_type
            ))),
        }
    }

    async fn build_types(&self) -> Result<Vec<BuildTypeDto>> {
        #[derive(Deserialize)]
        struct BuildTypesDto {
            #[serde(rename = "buildType", default)]
            build_types: Vec<BuildTypeDto>,
        }
        let url = format!("{}/app/rest/buildTypes", self.base_url);
        let container: BuildTypesDto = self.get_json(url).await?;
        Ok(container.build_types)
    }
}
