//! Webhook endpoint: signature verification, event routing, and dispatch.
//!
//! Authentication runs as middleware before the body is interpreted as any
//! event type. Unrecognized event types and comments that carry no command
//! are deliberate 200 no-ops so GitHub does not retry deliveries that will
//! never match; only malformed bodies on recognized event types are internal
//! errors.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::command::{classify_comment, Command};
use crate::fixup;
use crate::github::CommitStatusState;
use crate::merge;
use crate::squash;
use crate::AppState;

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub body: String,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    /// Present iff the issue is a pull request.
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
pub struct EventPullRequest {
    pub number: u64,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: EventPullRequest,
    pub repository: Repository,
}

/// Typed inbound event, dispatched once at the router.
#[derive(Debug)]
pub enum Event {
    IssueComment(IssueCommentEvent),
    PullRequest(PullRequestEvent),
}

/// Classify an event-type header and body into a typed event.
///
/// `Ok(None)` means the event type is not one we understand, which is a
/// success (the delivery is acknowledged and ignored). A malformed body on a
/// recognized type is an error.
pub fn parse_event(event_type: &str, body: &[u8]) -> Result<Option<Event>, serde_json::Error> {
    match event_type {
        "issue_comment" => Ok(Some(Event::IssueComment(serde_json::from_slice(body)?))),
        "pull_request" => Ok(Some(Event::PullRequest(serde_json::from_slice(body)?))),
        _ => Ok(None),
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

fn reply(text: impl Into<String>) -> Json<WebhookResponse> {
    Json(WebhookResponse {
        message: text.into(),
    })
}

type HmacSha256 = Hmac<Sha256>;

/// Verify `signature` (`sha256=<hex>`) as an HMAC-SHA256 over `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn require_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_signature(&state.webhook_secret, &bytes, signature) {
        warn!("Rejecting webhook delivery with invalid signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let event_type = request
        .headers()
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let event = match parse_event(&event_type, &bytes) {
        Ok(Some(event)) => event,
        Ok(None) => {
            info!("Ignoring webhook event type {:?}", event_type);
            return Ok(reply("Not an event I understand. Ignoring."));
        }
        Err(e) => {
            error!("Failed to parse {} payload: {}", event_type, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match event {
        Event::IssueComment(event) => handle_issue_comment(state, event).await,
        Event::PullRequest(event) => handle_pull_request(&state, event).await,
    }
}

async fn handle_issue_comment(
    state: Arc<AppState>,
    event: IssueCommentEvent,
) -> Result<Json<WebhookResponse>, StatusCode> {
    if event.issue.pull_request.is_none() {
        return Ok(reply("Not a PR. Ignoring."));
    }

    let repo = &event.repository;
    let owner = &repo.owner.login;
    let pr_number = event.issue.number;

    match classify_comment(&event.comment.body) {
        Some(command) => {
            info!(
                "{} from {} on {}#{}",
                command, event.comment.user.login, repo.full_name, pr_number
            );
            match command {
                Command::Squash => {
                    // History rewriting must run to completion once started,
                    // even if the delivery connection is aborted, so it runs
                    // in its own task rather than in the (droppable) handler
                    // future.
                    let task = {
                        let state = state.clone();
                        let owner = owner.clone();
                        let name = repo.name.clone();
                        tokio::spawn(async move {
                            squash::handle_squash_command(
                                &state.github_client,
                                &state.workspaces,
                                &owner,
                                &name,
                                pr_number,
                            )
                            .await
                        })
                    };
                    match task.await {
                        Ok(Ok(outcome)) => Ok(reply(outcome)),
                        Ok(Err(e)) => {
                            error!(
                                "Squash of {}#{} failed and could not be reported: {:#}",
                                repo.full_name, pr_number, e
                            );
                            Ok(reply(
                                "Squash failed; could not report the failure back to the PR.",
                            ))
                        }
                        Err(e) => {
                            error!("Squash task for {}#{} panicked: {}", repo.full_name, pr_number, e);
                            Err(StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    }
                }
                Command::Merge => {
                    match merge::handle_merge_command(
                        &state.github_client,
                        &state.merge_policy,
                        owner,
                        &repo.name,
                        pr_number,
                    )
                    .await
                    {
                        Ok(merge_state) => Ok(reply(merge_state.describe())),
                        Err(e) => {
                            error!(
                                "Merge of {}#{} aborted: {:#}",
                                repo.full_name, pr_number, e
                            );
                            Ok(reply("Merge aborted; a gating check could not be reported."))
                        }
                    }
                }
                Command::Approval => {
                    match merge::handle_approval_comment(
                        &state.github_client,
                        &state.merge_policy,
                        owner,
                        &repo.name,
                        pr_number,
                    )
                    .await
                    {
                        Ok(()) => Ok(reply("Peer review status updated.")),
                        Err(e) => {
                            error!(
                                "Peer review update for {}#{} failed: {:#}",
                                repo.full_name, pr_number, e
                            );
                            Ok(reply("Could not update the peer review status."))
                        }
                    }
                }
            }
        }
        None => Ok(reply("Not a command I understand. Ignoring.")),
    }
}

async fn handle_pull_request(
    state: &AppState,
    event: PullRequestEvent,
) -> Result<Json<WebhookResponse>, StatusCode> {
    if event.action != "opened" && event.action != "synchronize" {
        return Ok(reply("PR not opened or synchronized. Ignoring."));
    }

    let repo = &event.repository;
    let pr = &event.pull_request;

    match fixup::check_pull_request(
        &state.github_client,
        &repo.owner.login,
        &repo.name,
        pr.number,
        &pr.head.sha,
    )
    .await
    {
        Ok(CommitStatusState::Success) => Ok(reply("No fixup commits found.")),
        Ok(_) => Ok(reply("Fixup commits found; reported on the commit status.")),
        Err(e) => {
            error!(
                "Fixup check for {}#{} failed: {:#}",
                repo.full_name, pr.number, e
            );
            Ok(reply(
                "Fixup check failed; it will run again on the next push.",
            ))
        }
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            require_signature,
        ))
}
