//! Merge views with best-effort suggestions.

use crate::client::run_blocking;
use crate::collab::InsightGenerator;
use crate::error::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use versync_protocol::{ChangeSet, ConflictResolution};

/// Builds conflict resolutions and asks the insight generator for help.
#[derive(Clone)]
pub(crate) struct MergeResolver {
    insights: Arc<dyn InsightGenerator>,
    limit: Duration,
}

impl MergeResolver {
    pub(crate) fn new(insights: Arc<dyn InsightGenerator>, limit: Duration) -> Self {
        Self { insights, limit }
    }

    /// Builds the views for `incoming` against `latest`.
    ///
    /// Suggestions are requested only for the conflicted lines. A slow or
    /// failing generator leaves them empty.
    pub(crate) async fn resolve(&self, latest: &ChangeSet, incoming: &ChangeSet) -> ConflictResolution {
        let resolution = ConflictResolution::build(latest, incoming);
        if !resolution.conflict {
            return resolution;
        }

        let conflicted: ChangeSet = resolution
            .conflicted_lines()
            .into_iter()
            .filter_map(|line| incoming.get(line).cloned())
            .collect();

        let insights = Arc::clone(&self.insights);
        let analyzed = run_blocking(self.limit, "analyze", move || {
            insights.analyze(&conflicted).map_err(SyncError::from)
        })
        .await;

        match analyzed {
            Ok(insight) => {
                debug!(summary = %insight.summary, count = insight.suggestions.len(), "insights attached");
                resolution.with_suggestions(insight.suggestions)
            }
            Err(e) => {
                warn!(error = %e, "content insights unavailable");
                resolution
            }
        }
    }
}
