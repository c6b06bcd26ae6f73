use reqwest::Client;

use super::error::AniListError;
use super::types::{
    map_status_to_anilist, GraphQLResponse, MediaListCollectionResponse, MediaListEntry,
    MediaResponse, PageResponse, ViewerResponse,
};
use crate::traits::{AnimeSearchResult, AnimeService, LibraryEntryUpdate, UserListEntry};

const API_URL: &str = "https://graphql.anilist.co";

const MEDIA_FIELDS: &str = "
    id
    title { romaji english native }
    episodes
    coverImage { large }
    meanScore
    season
    seasonYear
    genres
    format
    status
    description(asHtml: false)
    synonyms
";

/// AniList GraphQL API client.
pub struct AniListClient {
    access_token: String,
    http: Client,
}

impl AniListClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            http: crate::http::client(),
        }
    }

    async fn graphql_request<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, AniListError> {
        tracing::debug!(operation, "AniList GraphQL request");

        let resp = self
            .http
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "query": query,
                "variables": variables,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(operation, status = status_code, "AniList API error");
            return Err(AniListError::Api {
                status: status_code,
                message: body,
            });
        }

        let body: GraphQLResponse<T> = resp
            .json()
            .await
            .map_err(|e| AniListError::Parse(e.to_string()))?;

        match body.data {
            Some(data) if body.errors.is_empty() => Ok(data),
            _ => Err(AniListError::GraphQL(
                body.errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    /// Get the authenticated user's ID.
    pub async fn get_viewer_id(&self) -> Result<u64, AniListError> {
        let resp: ViewerResponse = self
            .graphql_request("Viewer", "query { Viewer { id name } }", serde_json::json!({}))
            .await?;
        Ok(resp.viewer.id)
    }

    /// Fetch the authenticated user's full anime list (raw types).
    pub async fn get_user_list_full(&self) -> Result<Vec<MediaListEntry>, AniListError> {
        let user_id = self.get_viewer_id().await?;
        let query = format!(
            "query ($userId: Int) {{
                MediaListCollection(userId: $userId, type: ANIME) {{
                    lists {{
                        entries {{
                            mediaId
                            progress
                            score(format: POINT_100)
                            status
                            updatedAt
                            media {{ {MEDIA_FIELDS} }}
                        }}
                    }}
                }}
            }}"
        );
        let resp: MediaListCollectionResponse = self
            .graphql_request("UserList", &query, serde_json::json!({ "userId": user_id }))
            .await?;

        Ok(resp
            .media_list_collection
            .lists
            .into_iter()
            .flat_map(|group| group.entries)
            .collect())
    }
}

impl AnimeService for AniListClient {
    type Error = AniListError;

    async fn search_anime(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<AnimeSearchResult>, AniListError> {
        let gql = format!(
            "query ($search: String, $perPage: Int) {{
                Page(perPage: $perPage) {{
                    media(search: $search, type: ANIME) {{ {MEDIA_FIELDS} }}
                }}
            }}"
        );
        let resp: PageResponse = self
            .graphql_request(
                "Search",
                &gql,
                serde_json::json!({ "search": query, "perPage": limit }),
            )
            .await?;
        Ok(resp
            .page
            .media
            .into_iter()
            .map(|m| m.into_search_result())
            .collect())
    }

    async fn get_anime(&self, anime_id: u64) -> Result<AnimeSearchResult, AniListError> {
        let gql = format!(
            "query ($id: Int) {{
                Media(id: $id, type: ANIME) {{ {MEDIA_FIELDS} }}
            }}"
        );
        let resp: MediaResponse = self
            .graphql_request("GetAnime", &gql, serde_json::json!({ "id": anime_id }))
            .await?;
        Ok(resp.media.into_search_result())
    }

    async fn get_user_list(&self) -> Result<Vec<UserListEntry>, AniListError> {
        let entries = self.get_user_list_full().await?;
        Ok(entries
            .into_iter()
            .map(|e| e.into_user_list_entry())
            .collect())
    }

    async fn update_library_entry(
        &self,
        anime_id: u64,
        update: LibraryEntryUpdate,
    ) -> Result<(), AniListError> {
        // AniList ignores variables that are not sent.
        let mut vars = serde_json::json!({ "mediaId": anime_id });
        if let Some(ep) = update.episode {
            vars["progress"] = serde_json::json!(ep);
        }
        if let Some(ref status) = update.status {
            vars["status"] = serde_json::json!(map_status_to_anilist(status));
        }
        if let Some(score) = update.score {
            // scoreRaw is always POINT_100.
            vars["score"] = serde_json::json!((score * 10.0).round() as u32);
        }

        let _: serde_json::Value = self
            .graphql_request(
                "SaveMediaListEntry",
                "mutation ($mediaId: Int, $progress: Int, $status: MediaListStatus, $score: Int) {
                    SaveMediaListEntry(mediaId: $mediaId, progress: $progress,
                                       status: $status, scoreRaw: $score) {
                        id
                        progress
                    }
                }",
                vars,
            )
            .await?;
        Ok(())
    }
}
