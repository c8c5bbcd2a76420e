//! WebSocket gateway: pushes status and couple changes relevant to the
//! connected identity.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_core::dispatcher::StoreEvent;
use tandem_types::Couple;
use tandem_types::events::{GatewayCommand, GatewayEvent};

use crate::ApiState;
use crate::middleware::decode_token;

/// Server sends a Ping every 15 seconds. Two missed Pongs drop the
/// connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_upgrade(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

pub async fn handle_connection(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, name)) = wait_for_identify(&mut receiver, &state.jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    info!("{} ({}) connected to gateway", name, user_id);

    // Subscribe before the initial snapshot so nothing written in between is lost
    let events = state.store.events();

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, name: name.clone() }).await {
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let (resync_tx, resync_rx) = mpsc::unbounded_channel();

    let mut send_task = tokio::spawn(run_sender(
        sender,
        state.clone(),
        user_id,
        events,
        resync_rx,
        pong_received.clone(),
    ));

    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(GatewayCommand::Resync) => {
                        if resync_tx.send(()).is_err() {
                            break;
                        }
                    }
                    Ok(GatewayCommand::Identify { .. }) => {}
                    Err(e) => {
                        let raw: String = text.as_str().chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", name_recv, user_id, e, raw);
                    }
                },
                Message::Pong(_) => pong_received.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", name, user_id);
}

/// What the connection forwards: the caller's own status, the partner's
/// status and the caller's couple.
#[derive(Debug, Default)]
struct Interest {
    couple_id: Option<String>,
    partner_id: Option<Uuid>,
}

impl Interest {
    fn track(&mut self, user_id: Uuid, couple: &Couple) {
        self.couple_id = Some(couple.id.clone());
        self.partner_id = couple.partner_of(user_id);
    }

    fn wants(&self, user_id: Uuid, event: &StoreEvent) -> bool {
        if let Some(owner) = event.status_owner() {
            return owner == user_id || Some(owner) == self.partner_id;
        }
        match event {
            StoreEvent::CoupleChanged(c) => {
                c.first_member == user_id || c.second_member == Some(user_id)
            }
            _ => event.couple_id().is_some() && event.couple_id() == self.couple_id.as_deref(),
        }
    }
}

async fn run_sender(
    mut sender: SplitSink<WebSocket, Message>,
    state: ApiState,
    user_id: Uuid,
    mut events: tokio::sync::broadcast::Receiver<StoreEvent>,
    mut resync_rx: mpsc::UnboundedReceiver<()>,
    pong_received: Arc<AtomicBool>,
) {
    let mut interest = Interest::default();
    if !resync(&mut sender, &state, user_id, &mut interest).await {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            result = events.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("gateway for {} lagged by {} events, resyncing", user_id, n);
                        if !resync(&mut sender, &state, user_id, &mut interest).await {
                            break;
                        }
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !interest.wants(user_id, &event) {
                    continue;
                }

                let outgoing = match event {
                    StoreEvent::StatusChanged(status) => GatewayEvent::StatusUpdate { status },
                    StoreEvent::CoupleChanged(couple) => {
                        interest.track(user_id, &couple);
                        GatewayEvent::CoupleUpdate { couple }
                    }
                    StoreEvent::CoupleRemoved { couple_id } => {
                        interest = Interest::default();
                        GatewayEvent::CoupleRemoved { couple_id }
                    }
                };
                if !send_event(&mut sender, &outgoing).await {
                    break;
                }
            }
            request = resync_rx.recv() => {
                if request.is_none() || !resync(&mut sender, &state, user_id, &mut interest).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Send the current couple and both statuses. Read failures are logged and
/// skipped; only a closed socket ends the connection.
async fn resync(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &ApiState,
    user_id: Uuid,
    interest: &mut Interest,
) -> bool {
    match state.pairing.get_relation(user_id).await {
        Ok(Some(couple)) => {
            interest.track(user_id, &couple);
            if !send_event(sender, &GatewayEvent::CoupleUpdate { couple }).await {
                return false;
            }
        }
        Ok(None) => *interest = Interest::default(),
        Err(e) => warn!("gateway couple read for {} failed: {}", user_id, e),
    }

    for owner in std::iter::once(user_id).chain(interest.partner_id) {
        match state.statuses.read_status(owner).await {
            Ok(Some(status)) => {
                if !send_event(sender, &GatewayEvent::StatusUpdate { status }).await {
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("gateway status read for {} failed: {}", owner, e),
        }
    }
    debug!("gateway resynced {}", user_id);
    true
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("cannot encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            if let Ok(GatewayCommand::Identify { token }) =
                serde_json::from_str::<GatewayCommand>(text.as_str())
            {
                let claims = decode_token(jwt_secret, &token)?;
                return Some((claims.sub, claims.name));
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_types::{InviteCode, StatusRecord};

    #[test]
    fn interest_follows_couple_membership() {
        let me = Uuid::new_v4();
        let partner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut interest = Interest::default();

        let status = |owner| StoreEvent::StatusChanged(StatusRecord::neutral(owner, Utc::now()));
        assert!(interest.wants(me, &status(me)));
        assert!(!interest.wants(me, &status(partner)));

        let couple = Couple {
            id: "c1".into(),
            first_member: me,
            second_member: Some(partner),
            invite_code: InviteCode::parse("K7M3QX").unwrap(),
            created_at: Utc::now(),
            connected_at: Some(Utc::now()),
        };
        assert!(interest.wants(me, &StoreEvent::CoupleChanged(couple.clone())));
        interest.track(me, &couple);

        assert!(interest.wants(me, &status(partner)));
        assert!(!interest.wants(me, &status(stranger)));
        assert!(interest.wants(me, &StoreEvent::CoupleRemoved { couple_id: "c1".into() }));
        assert!(!interest.wants(me, &StoreEvent::CoupleRemoved { couple_id: "c2".into() }));
    }
}
