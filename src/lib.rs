#![allow(async_fn_in_trait)]
pub mod bng;
pub mod catalog;
pub mod download_plan;
pub mod environment_agency;
pub mod error;
pub mod http;
pub mod region;
pub mod request;
