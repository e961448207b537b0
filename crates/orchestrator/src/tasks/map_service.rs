//! Map service: answers `NavigationReqList` with planned routes
//!
//! 每个请求 id 只处理一次。规划成功的路线放入信箱供 navigate 循环注册主车，
//! 逐项结果写入 `NavigationRsp`。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::{keys, NavigationItem, NavigationRequest, NavigationResponse, PlannedRoute};
use sim_engine::SimulationEngine;
use tracing::{debug, info, instrument, warn};

use crate::context::{InstanceContext, InstanceStats};
use crate::gate::EventGate;

/// Poll period of the request key
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Per-item result for a planned route
pub const PLAN_OK: &str = "successful";

#[instrument(name = "map_service_task", skip(ctx), fields(instance = %ctx.instance_id()))]
pub fn run_map_service<E: SimulationEngine + 'static>(ctx: Arc<InstanceContext<E>>) {
    ctx.coordinator().wait_for_init();
    info!(instance = %ctx.instance_id(), "Map service started");

    let mut gate = EventGate::new();
    while ctx.is_running() {
        if ctx.store_ready() {
            map_service_once(&ctx, &mut gate);
        }
        if !ctx.sleep_while_running(POLL_INTERVAL) {
            break;
        }
    }
    info!(instance = %ctx.instance_id(), "Map service finished");
}

/// Handle the pending request, if new; returns the response written
pub fn map_service_once<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    gate: &mut EventGate,
) -> Option<NavigationResponse> {
    let request = ctx.read_document::<NavigationRequest>(keys::NAVIGATION_REQUEST)?;
    if !gate.admit(&request.id) {
        return None;
    }
    info!(instance = %ctx.instance_id(), request = %request.id, items = request.items.len(), "Navigation request received");

    let mut routes = Vec::new();
    let mut info_list = Vec::with_capacity(request.items.len());
    for item in &request.items {
        match plan_item(ctx, item) {
            Ok(route) => {
                debug!(actor = %route.actor_id, edges = route.edges.len(), "Route planned");
                routes.push(route);
                info_list.push(PLAN_OK.to_string());
            }
            Err(message) => {
                warn!(actor = %item.actor_id, error = %message, "Route planning failed");
                info_list.push(message);
            }
        }
    }

    InstanceStats::add(&ctx.stats().routes_planned, routes.len() as u64);
    if !routes.is_empty() {
        ctx.routes().post(routes);
    }

    let response = NavigationResponse {
        id: request.id,
        time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        info: info_list,
    };
    if !ctx.write_document(keys::NAVIGATION_RESPONSE, &response) {
        warn!(instance = %ctx.instance_id(), request = %response.id, "Failed to publish navigation response");
    }
    Some(response)
}

/// Plan one item; the error is the text reported back to the requester
fn plan_item<E: SimulationEngine + 'static>(
    ctx: &InstanceContext<E>,
    item: &NavigationItem,
) -> std::result::Result<PlannedRoute, String> {
    let (Some(origin), Some(destination)) = (item.origin(), item.destination()) else {
        return Err(format!("invalid coordinates for {}", item.actor_id));
    };
    let (offset_x, offset_y) = (ctx.config().offset_x, ctx.config().offset_y);
    let edges = ctx
        .planner()
        .plan(
            &origin.offset(-offset_x, -offset_y),
            &destination.offset(-offset_x, -offset_y),
        )
        .map_err(|e| e.to_string())?;
    if edges.is_empty() {
        return Err(format!("no route for {}", item.actor_id));
    }
    Ok(PlannedRoute {
        actor_id: item.actor_id.clone(),
        origin,
        destination,
        edges,
    })
}
