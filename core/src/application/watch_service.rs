//! Point-in-time views for periodic refresh.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{Filter, PortBinding};
use crate::error::Result;
use crate::ports::{Enumerator, ProcessResolver};

use super::list_service::{ListService, SortField};

/// One enumeration pass, ready to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub bindings: Vec<PortBinding>,
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Produces snapshots; the caller owns the refresh loop.
pub struct WatchService<E: Enumerator, R: ProcessResolver> {
    list: ListService<E, R>,
}

impl<E: Enumerator, R: ProcessResolver> WatchService<E, R> {
    pub fn new(enumerator: E, resolver: R) -> Self {
        Self {
            list: ListService::new(enumerator, resolver),
        }
    }

    pub async fn snapshot(
        &self,
        filter: Option<&Filter>,
        cancel: &CancellationToken,
    ) -> Result<Snapshot> {
        let listed = self.list.list(filter, SortField::Port, cancel).await?;
        Ok(Snapshot {
            taken_at: Utc::now(),
            partial: listed.partial,
            warnings: listed.warnings,
            bindings: listed.data,
        })
    }
}
