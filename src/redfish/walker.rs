use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};

use super::SERVICE_ROOT;
use super::client::FetchError;
use super::resource::{Link, ResourceKind, ResourceNode};
use super::session::SessionHandle;

/// Deep enough for the service root to reach the metrics of a power
/// supply, `/Chassis/{id}/PowerSubsystem/PowerSupplies/{id}/Metrics`.
pub const DEFAULT_MAX_DEPTH: usize = 6;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("service root unreachable: {0}")]
    ServiceRoot(#[source] FetchError),
    #[error("deadline exceeded before the service root answered")]
    Deadline,
    #[error("service root links neither Systems nor Chassis")]
    NoRoots,
    #[error("neither Systems nor Chassis is reachable")]
    RootsUnreachable,
}

#[derive(Clone, Debug)]
pub struct WalkOptions {
    /// Max in-flight fetches.
    pub concurrency: usize,

    pub max_depth: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            concurrency: 8,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A resource that could not be fetched.
#[derive(Debug)]
pub struct Skipped {
    pub uri: String,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct Walk {
    /// Fetched resources, in completion order.
    pub nodes: Vec<ResourceNode>,

    pub skipped: Vec<Skipped>,

    /// The deadline elapsed before every link was followed.
    pub truncated: bool,
}

struct Pending {
    link: Link,
    parent: String,
    depth: usize,
    top_level: bool,
}

/// Fetch the part of the resource graph reachable from the service root
/// through whitelisted relations.
///
/// At most `concurrency` fetches are in flight. When `deadline` elapses no
/// new fetch is started, in-flight ones are abandoned and the nodes fetched
/// so far are returned.
pub async fn walk(
    session: Arc<SessionHandle>,
    deadline: Instant,
    options: &WalkOptions,
) -> Result<Walk, WalkError> {
    let root = match timeout_at(deadline, session.get(SERVICE_ROOT)).await {
        Ok(Ok(body)) => body,
        Ok(Err(err)) => return Err(WalkError::ServiceRoot(err)),
        Err(_) => return Err(WalkError::Deadline),
    };
    let root = ResourceNode::new(SERVICE_ROOT.to_string(), ResourceKind::ServiceRoot, None, root);

    let mut visited = HashSet::from([root.uri.clone()]);
    let mut frontier = VecDeque::new();
    let mut top_level = 0;
    for link in root.links() {
        if !visited.insert(link.uri.clone()) {
            continue;
        }

        let is_top = matches!(link.relation, "Systems" | "Chassis");
        if is_top {
            top_level += 1;
        }

        frontier.push_back(Pending {
            link,
            parent: root.uri.clone(),
            depth: 1,
            top_level: is_top,
        });
    }

    if top_level == 0 {
        return Err(WalkError::NoRoots);
    }

    let mut walk = Walk {
        nodes: vec![root],
        ..Default::default()
    };
    let mut top_failed = 0;
    let mut tasks = JoinSet::new();

    loop {
        while tasks.len() < options.concurrency.max(1) {
            let Some(pending) = frontier.pop_front() else {
                break;
            };

            let session = Arc::clone(&session);
            tasks.spawn(async move {
                let result = session.get(&pending.link.uri).await;
                (pending, result)
            });
        }

        if tasks.is_empty() {
            break;
        }

        let (pending, result) = match timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(done))) => done,
            Ok(Some(Err(err))) => {
                warn!(message = "Fetch task failed", %err);
                continue;
            }
            Ok(None) => break,
            Err(_) => {
                walk.truncated = true;
                tasks.abort_all();
                break;
            }
        };

        match result {
            Ok(body) => {
                let node = ResourceNode::new(
                    pending.link.uri,
                    pending.link.hint,
                    Some(pending.parent),
                    body,
                );

                if pending.depth < options.max_depth {
                    for link in node.links() {
                        if visited.insert(link.uri.clone()) {
                            frontier.push_back(Pending {
                                link,
                                parent: node.uri.clone(),
                                depth: pending.depth + 1,
                                top_level: false,
                            });
                        }
                    }
                }

                walk.nodes.push(node);
            }
            Err(error) => {
                debug!(
                    message = "Skipping resource",
                    target = session.client().base(),
                    uri = %pending.link.uri,
                    %error,
                );

                if pending.top_level {
                    top_failed += 1;
                }

                walk.skipped.push(Skipped {
                    uri: pending.link.uri,
                    error,
                });
            }
        }
    }

    if top_failed == top_level {
        return Err(WalkError::RootsUnreachable);
    }

    if walk.truncated {
        debug!(
            message = "Walk truncated by deadline",
            target = session.client().base(),
            fetched = walk.nodes.len(),
            pending = frontier.len(),
        );
    }

    Ok(walk)
}
