use reqwest::Client;

use super::error::MalError;
use super::types::{map_status_to_mal, Anime, Edge, Page};
use crate::traits::{AnimeSearchResult, AnimeService, LibraryEntryUpdate, UserListEntry};

const BASE_URL: &str = "https://api.myanimelist.net";

/// Shared fields parameter for MAL anime queries.
const ANIME_FIELDS: &str = "id,title,alternative_titles,num_episodes,main_picture,media_type,\
                             status,synopsis,genres,mean,start_season";

/// MyAnimeList API v2 client.
pub struct MalClient {
    access_token: String,
    http: Client,
}

impl MalClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            http: crate::http::client(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Check the HTTP response for errors and return the body text on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, MalError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "MAL API error");
            Err(MalError::Api {
                status,
                message: body,
            })
        }
    }

    /// Fetch the authenticated user's full anime list, following pagination.
    pub async fn get_user_list_full(&self) -> Result<Vec<Edge>, MalError> {
        let mut items = Vec::new();
        let mut url = format!(
            "{BASE_URL}/v2/users/@me/animelist\
             ?fields=list_status,{ANIME_FIELDS}\
             &limit=100&nsfw=true"
        );

        loop {
            tracing::debug!(url = %url, "MAL list page request");
            let resp = self
                .http
                .get(&url)
                .header("Authorization", self.auth_header())
                .send()
                .await?;

            let resp = Self::check_response(resp).await?;
            let page: Page<Edge> = resp
                .json()
                .await
                .map_err(|e| MalError::Parse(e.to_string()))?;

            items.extend(page.data);

            match page.paging.next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(items)
    }
}

impl AnimeService for MalClient {
    type Error = MalError;

    async fn search_anime(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<AnimeSearchResult>, MalError> {
        // MAL caps search pages at 100.
        let limit = limit.clamp(1, 100).to_string();
        let resp = self
            .http
            .get(format!("{BASE_URL}/v2/anime"))
            .header("Authorization", self.auth_header())
            .query(&[("q", query), ("limit", limit.as_str()), ("fields", ANIME_FIELDS)])
            .send()
            .await?;

        let resp = Self::check_response(resp).await?;
        let search: Page<Edge> = resp
            .json()
            .await
            .map_err(|e| MalError::Parse(e.to_string()))?;

        Ok(search
            .data
            .into_iter()
            .map(|edge| edge.node.into_search_result())
            .collect())
    }

    async fn get_anime(&self, anime_id: u64) -> Result<AnimeSearchResult, MalError> {
        let resp = self
            .http
            .get(format!("{BASE_URL}/v2/anime/{anime_id}"))
            .header("Authorization", self.auth_header())
            .query(&[("fields", ANIME_FIELDS)])
            .send()
            .await?;

        let resp = Self::check_response(resp).await?;
        let node: Anime = resp
            .json()
            .await
            .map_err(|e| MalError::Parse(e.to_string()))?;

        Ok(node.into_search_result())
    }

    async fn get_user_list(&self) -> Result<Vec<UserListEntry>, MalError> {
        let items = self.get_user_list_full().await?;
        Ok(items
            .into_iter()
            .map(|item| item.into_user_list_entry())
            .collect())
    }

    async fn update_library_entry(
        &self,
        anime_id: u64,
        update: LibraryEntryUpdate,
    ) -> Result<(), MalError> {
        let url = format!("{BASE_URL}/v2/anime/{anime_id}/my_list_status");

        // PATCH my_list_status is an upsert and wants a form body.
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(ep) = update.episode {
            params.push(("num_watched_episodes", ep.to_string()));
        }
        if let Some(ref status) = update.status {
            params.push(("status", map_status_to_mal(status).to_string()));
        }
        if let Some(score) = update.score {
            params.push(("score", (score.round() as u32).min(10).to_string()));
        }

        let resp = self
            .http
            .patch(&url)
            .header("Authorization", self.auth_header())
            .form(&params)
            .send()
            .await?;

        Self::check_response(resp).await?;
        Ok(())
    }
}
