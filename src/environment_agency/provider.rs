use crate::http;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, Response};

/// Download client for the Environment Agency survey service.
pub struct Provider {
    client: Client,
}

impl Provider {
    pub fn with_user_agent(user_agent: &str) -> anyhow::Result<Self> {
        let client = http::client(user_agent)?;
        Ok(Self { client })
    }
}

impl http::HttpObjOps for Provider {
    async fn head_object(self: &Self, url: &str) -> anyhow::Result<Option<u64>> {
        let head = self.client.head(url).send().await?;
        // Generated downloads often refuse HEAD; treat that as an unknown size
        if !head.status().is_success() {
            return Ok(None);
        }
        // The body of a HEAD response is empty, so read the header rather than the body size
        let size = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0);
        Ok(size)
    }

    async fn get_object(self: &Self, url: &str) -> anyhow::Result<Response> {
        let object = self.client.get(url).send().await?;
        Ok(object)
    }

    async fn get_object_range(
        self: &Self,
        url: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> anyhow::Result<Response> {
        let range = format!("bytes={}-{}", start_byte, end_byte);
        let object = self.client.get(url).header(RANGE, range).send().await?;
        Ok(object)
    }
}
