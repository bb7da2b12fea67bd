//! Demo `Chat` hub plus a `System.Ping` liveness method.
//!
//! | Method              | Args                 | Effect                                      |
//! |---------------------|----------------------|---------------------------------------------|
//! | `Chat.Send`         | `[text]`             | Push `Chat.Receive` to every other client   |
//! | `Chat.Join`         | `[room]`             | Add the caller to a room                    |
//! | `Chat.Leave`        | `[room]`             | Remove the caller from a room               |
//! | `Chat.SendToRoom`   | `[room, text]`       | Push `Chat.Receive` to the room's members   |
//! | `System.Ping`       | `[]`                 | Returns `"pong"`                            |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubwire_server::rpc::context::InvocationContext;
use hubwire_server::rpc::errors::{HandlerFault, NOT_FOUND, RegistryError};
use hubwire_server::rpc::interceptor::Interceptor;
use hubwire_server::rpc::interceptors::{InvocationLogger, RateLimiter};
use hubwire_server::rpc::registry::{MethodHandler, MethodRegistry, ParamKind, Signature};
use hubwire_server::rpc::types::PushMessage;
use hubwire_settings::RateLimitSettings;
use serde_json::{Value, json};

const MAX_TEXT_LEN: usize = 4096;

fn read_text(ctx: &InvocationContext, index: usize) -> Result<String, HandlerFault> {
    let text: String = ctx.arg_as(index)?;
    if text.is_empty() {
        return Err(HandlerFault::invalid_arguments("message text is empty"));
    }
    if text.len() > MAX_TEXT_LEN {
        return Err(HandlerFault::invalid_arguments(format!(
            "message text exceeds {MAX_TEXT_LEN} bytes"
        )));
    }
    Ok(text)
}

fn receive(ctx: &InvocationContext, room: Option<&str>, text: String) -> PushMessage {
    PushMessage::new(
        "Chat",
        "Receive",
        vec![json!(ctx.connection_id()), json!(room), json!(text)],
    )
}

/// `Chat.Send(text)`
pub struct SendHandler;

#[async_trait]
impl MethodHandler for SendHandler {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let text = read_text(ctx, 0)?;
        let report = ctx
            .gateway()
            .send_to_all_except(ctx.connection_id(), &receive(ctx, None, text));
        Ok(json!({ "delivered": report.delivered }))
    }
}

/// `Chat.Join(room)`
pub struct JoinHandler;

#[async_trait]
impl MethodHandler for JoinHandler {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let room: String = ctx.arg_as(0)?;
        let gateway = ctx.gateway();
        if !gateway.table().contains(ctx.connection_id()) {
            return Err(HandlerFault::NotFound {
                kind: NOT_FOUND.into(),
                message: format!("connection {} is gone", ctx.connection_id()),
            });
        }
        // Re-joining a room the caller is already in is a no-op.
        let _ = gateway.add_to_group(ctx.connection_id(), &room);
        Ok(json!(gateway.group_members(&room).len()))
    }
}

/// `Chat.Leave(room)`
pub struct LeaveHandler;

#[async_trait]
impl MethodHandler for LeaveHandler {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let room: String = ctx.arg_as(0)?;
        Ok(json!(
            ctx.gateway().remove_from_group(ctx.connection_id(), &room)
        ))
    }
}

/// `Chat.SendToRoom(room, text)`
pub struct SendToRoomHandler;

#[async_trait]
impl MethodHandler for SendToRoomHandler {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let room: String = ctx.arg_as(0)?;
        let text = read_text(ctx, 1)?;
        let report = ctx
            .gateway()
            .send_to_group(&room, &receive(ctx, Some(&room), text));
        Ok(json!({ "delivered": report.delivered }))
    }
}

/// `System.Ping()`
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        Ok(json!("pong"))
    }
}

/// Register the demo methods.
///
/// Sending methods share one rate limiter, so the quota covers each
/// (connection, method) pair separately.
pub fn register_chat_hub(
    registry: &mut MethodRegistry,
    rate_limit: &RateLimitSettings,
    logger: Arc<InvocationLogger>,
) -> Result<(), RegistryError> {
    let limiter: Arc<dyn Interceptor> = Arc::new(RateLimiter::new(
        rate_limit.max_invocations,
        Duration::from_millis(rate_limit.window_ms),
    ));
    let logger: Arc<dyn Interceptor> = logger;
    let sending = vec![Arc::clone(&limiter), Arc::clone(&logger)];
    let room = Signature::new(vec![ParamKind::String], ParamKind::Any);

    registry.register_typed(
        "Chat",
        "Send",
        Signature::new(vec![ParamKind::String], ParamKind::Object),
        SendHandler,
        sending.clone(),
    )?;
    registry.register_typed(
        "Chat",
        "SendToRoom",
        Signature::new(vec![ParamKind::String, ParamKind::String], ParamKind::Object),
        SendToRoomHandler,
        sending,
    )?;
    registry.register_typed("Chat", "Join", room.clone(), JoinHandler, vec![Arc::clone(&logger)])?;
    registry.register_typed("Chat", "Leave", room, LeaveHandler, vec![logger])?;
    registry.register("System", "Ping", PingHandler, vec![])?;
    Ok(())
}
