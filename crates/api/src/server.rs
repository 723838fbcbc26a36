//! HTTP query handlers.
//!
//! Stateless composition over the projections: every handler reads from the
//! indexers under their own locks and assembles a response DTO. Bulk reads
//! skip agents with a missing constituent projection entry; the
//! single-agent read is a 404 when any of its three reads miss. Wide
//! integers serialize as decimal strings.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use gauntlet_core::Address;
use gauntlet_indexer::{
    AgentBalance, AgentBalanceIndexer, AgentIndexer, AgentInfo, AgentUsage, AgentUsageIndexer,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Registration projection.
    pub agents: Arc<AgentIndexer>,
    /// Balance projection and leaderboard.
    pub balances: Arc<AgentBalanceIndexer>,
    /// Usage projection.
    pub usages: Arc<AgentUsageIndexer>,
    /// Page size for every paginated route.
    pub page_size: u64,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/leaderboard", get(get_leaderboard))
        .route("/agent/{address}", get(get_agent))
        .route("/user/agents", get(get_user_agents))
        .route("/search", get(search_agents))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg.into() })),
    )
}

fn not_found(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": msg.into() })),
    )
}

/// One agent as served over HTTP.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentData {
    /// Balance not yet read from chain.
    pub pending: bool,
    /// Agent address, hex.
    pub address: String,
    /// Prize token address, hex.
    pub token: String,
    /// Display name.
    pub name: String,
    /// Prize balance, decimal string.
    pub balance: String,
    /// Prize deadline (unix seconds), decimal string.
    pub end_time: String,
    /// Whether the prize has been drained.
    pub is_drained: bool,
    /// Past its deadline or drained.
    pub is_finalized: bool,
    /// Price per prompt, decimal string.
    pub prompt_price: String,
    /// Total consumed prompts, decimal string.
    pub break_attempts: String,
    /// Most recent outcomes, oldest first.
    pub latest_prompts: Vec<AgentDataLatestPrompt>,
}

/// One recorded prompt outcome as served over HTTP.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentDataLatestPrompt {
    /// Prompt text (empty if the paid event could not be correlated).
    pub prompt: String,
    /// Whether the attempt drained the agent.
    pub is_success: bool,
    /// Drain recipient, hex; the zero address for failed attempts.
    pub drained_to: String,
}

/// A page of agents.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentPageResponse {
    /// The page contents.
    pub agents: Vec<AgentData>,
    /// Total agents matching the query.
    pub total: u64,
    /// The requested page.
    pub page: u64,
    /// Page size in effect.
    pub page_size: u64,
    /// Projection watermark backing the page.
    pub last_block: u64,
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserAgentsQuery {
    user: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    name: Option<String>,
    page: Option<String>,
}

/// A missing or garbled page parameter falls back to the first page.
fn parse_page(raw: &Option<String>) -> u64 {
    raw.as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

fn agent_data(info: &AgentInfo, balance: &AgentBalance, usage: &AgentUsage) -> AgentData {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    AgentData {
        pending: balance.pending,
        address: info.address.hex().to_string(),
        token: balance.token.to_hex(),
        name: info.name.clone(),
        balance: balance.amount.to_string(),
        end_time: balance.end_time.to_string(),
        is_drained: usage.is_drained,
        is_finalized: now > balance.end_time || usage.is_drained,
        prompt_price: info.prompt_price.to_string(),
        break_attempts: usage.break_attempts.to_string(),
        latest_prompts: usage
            .latest_prompts
            .iter()
            .map(|p| AgentDataLatestPrompt {
                prompt: p.prompt.clone(),
                is_success: p.is_success,
                drained_to: p.drained_to.to_hex(),
            })
            .collect(),
    }
}

/// Assemble one agent from all three projections; `None` skips the agent.
fn compose_agent(state: &AppState, address: &Address) -> Option<AgentData> {
    let info = state.agents.get(address)?;
    let balance = state.balances.get_balance(address)?;
    let usage = state.usages.get(address)?;
    Some(agent_data(&info, &balance, &usage))
}

async fn health() -> &'static str {
    "OK"
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<AgentPageResponse> {
    let page = parse_page(&query.page);
    let window = state
        .balances
        .get_leaderboard(page * state.page_size, (page + 1) * state.page_size);

    let agents = window
        .agents
        .iter()
        .filter_map(|address| {
            let data = compose_agent(&state, address);
            if data.is_none() {
                error!(agent = %address, "skipping leaderboard entry with incomplete projections");
            }
            data
        })
        .collect();

    Json(AgentPageResponse {
        agents,
        total: window.agent_count,
        page,
        page_size: state.page_size,
        last_block: window.last_block,
    })
}

async fn get_agent(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AgentData>, ApiError> {
    let address: Address = address
        .parse()
        .map_err(|e| bad_request(format!("invalid agent address: {e}")))?;

    let balance = state
        .balances
        .get_balance(&address)
        .ok_or_else(|| not_found("agent not found in balance indexer"))?;
    let info = state
        .agents
        .get(&address)
        .ok_or_else(|| not_found("agent not found in agent indexer"))?;
    let usage = state
        .usages
        .get(&address)
        .ok_or_else(|| not_found("agent not found in usage indexer"))?;

    Ok(Json(agent_data(&info, &balance, &usage)))
}

async fn get_user_agents(
    State(state): State<AppState>,
    Query(query): Query<UserAgentsQuery>,
) -> Result<Json<AgentPageResponse>, ApiError> {
    let user = query.user.as_deref().ok_or_else(|| bad_request("user address required"))?;
    let user: Address = user
        .parse()
        .map_err(|e| bad_request(format!("invalid user address: {e}")))?;
    let page = parse_page(&query.page);

    let result = state
        .agents
        .agents_by_creator(&user, page * state.page_size, state.page_size)
        .ok_or_else(|| not_found("no agents found for user"))?;

    let agents = result
        .agents
        .iter()
        .filter_map(|info| {
            let address = info.address.address();
            let balance = state.balances.get_balance(&address);
            let usage = state.usages.get(&address);
            match (balance, usage) {
                (Some(balance), Some(usage)) => Some(agent_data(info, &balance, &usage)),
                _ => {
                    error!(agent = %address, "skipping agent with incomplete projections");
                    None
                }
            }
        })
        .collect();

    Ok(Json(AgentPageResponse {
        agents,
        total: result.total,
        page,
        page_size: state.page_size,
        last_block: result.last_block,
    }))
}

async fn search_agents(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<AgentPageResponse>, ApiError> {
    let name = query.name.as_deref().ok_or_else(|| bad_request("name required"))?;
    if name.is_empty() {
        return Err(bad_request("name required"));
    }
    let page = parse_page(&query.page);

    let result = state
        .agents
        .agents_by_name_prefix(name, page * state.page_size, state.page_size)
        .ok_or_else(|| not_found("no agents found for name"))?;

    let agents = result
        .agents
        .iter()
        .filter_map(|info| {
            let address = info.address.address();
            let balance = state.balances.get_balance(&address);
            let usage = state.usages.get(&address);
            match (balance, usage) {
                (Some(balance), Some(usage)) => Some(agent_data(info, &balance, &usage)),
                _ => {
                    error!(agent = %address, "skipping agent with incomplete projections");
                    None
                }
            }
        })
        .collect();

    Ok(Json(AgentPageResponse {
        agents,
        total: result.total,
        page,
        page_size: state.page_size,
        last_block: result.last_block,
    }))
}
