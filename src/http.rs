//! Utility functions for creating http clients, and the object operations downloads rely on
use anyhow::Result;
use reqwest::{Client, Response};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn client(user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

pub trait HttpObjOps {
    /// Size of the remote object, or `None` when the server won't say.
    async fn head_object(self: &Self, url: &str) -> Result<Option<u64>>;

    async fn get_object(self: &Self, url: &str) -> Result<Response>;

    async fn get_object_range(
        self: &Self,
        url: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> Result<Response>;
}
