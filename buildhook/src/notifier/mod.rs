pub mod webhook;

use crate::models::ResultRecord;
use async_trait::async_trait;
use std::fmt::Debug;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum NotifierError {
    #[error("could not deliver notification; {0}")]
    Connection(String),

    #[error("notification endpoint responded with status code {code}; {body}")]
    Status { code: u16, body: String },
}

/// Tells the outside world how a run ended.
#[async_trait]
pub trait Notifier: Debug + Send + Sync + 'static {
    async fn notify(&self, record: &ResultRecord) -> Result<(), NotifierError>;
}
