//! Lead inbox dispatcher
//!
//! Classifies every message popped from the lead's team-namespace inbox
//! with the protocol parsers and applies the member/plan bookkeeping.
//! Anything unrecognized surfaces as a generic message notice.

use crate::runtime::{LeaderRuntime, PendingPlan};
use pi_teams_core::schema::{MemberRole, MemberStatus, TeamMember};
use pi_teams_core::text::truncate_chars;
use pi_teams_core::{MailboxMessage, WireMessage};
use std::collections::HashMap;
use std::sync::Arc;

/// Plan text shown in the approval notice is capped at this many chars.
const PLAN_PREVIEW_CHARS: usize = 500;

/// Session name the leader wants a worker to carry, derived from the team
/// style and the agent name.
pub(crate) fn desired_session_name(style: &str, agent: &str) -> String {
    match style {
        "" | "normal" => agent.to_string(),
        style => format!("{agent} ({style})"),
    }
}

/// Make sure a member row exists before mutating it; senders may be
/// workers the leader never spawned (manual joiners).
async fn ensure_member_known(rt: &Arc<LeaderRuntime>, name: &str) -> anyhow::Result<()> {
    let team = rt.team.clone();
    let member_name = name.to_string();
    LeaderRuntime::blocking(move || {
        if let Some(config) = team.load()? {
            if config.member(&member_name).is_some() {
                return Ok(());
            }
        }
        team.upsert_member(TeamMember::new(member_name, MemberRole::Worker))
            .map(|_| ())
    })
    .await
}

async fn set_member_status(
    rt: &Arc<LeaderRuntime>,
    name: &str,
    status: MemberStatus,
    meta: Option<HashMap<String, serde_json::Value>>,
) -> anyhow::Result<()> {
    let team = rt.team.clone();
    let member_name = name.to_string();
    LeaderRuntime::blocking(move || {
        team.set_member_status(
            &member_name,
            status,
            Some(chrono::Utc::now().to_rfc3339()),
            meta,
        )
        .map(|_| ())
    })
    .await
}

pub(crate) async fn dispatch_message(
    rt: &Arc<LeaderRuntime>,
    msg: MailboxMessage,
) -> anyhow::Result<()> {
    match WireMessage::parse(&msg.text) {
        Some(WireMessage::ShutdownApproved {
            from, request_id, ..
        }) => {
            ensure_member_known(rt, &from).await?;
            let mut meta = HashMap::new();
            meta.insert(
                "shutdownApprovedRequestId".to_string(),
                serde_json::Value::String(request_id.clone()),
            );
            set_member_status(rt, &from, MemberStatus::Offline, Some(meta)).await?;
            rt.ui.notify(&format!("{from} approved shutdown"));
        }

        Some(WireMessage::ShutdownRejected {
            from,
            request_id,
            reason,
            ..
        }) => {
            ensure_member_known(rt, &from).await?;
            let mut meta = HashMap::new();
            meta.insert(
                "shutdownRejectedRequestId".to_string(),
                serde_json::Value::String(request_id),
            );
            meta.insert(
                "shutdownRejectedReason".to_string(),
                serde_json::Value::String(reason.clone()),
            );
            set_member_status(rt, &from, MemberStatus::Online, Some(meta)).await?;
            rt.ui
                .notify(&format!("{from} rejected shutdown: {reason}"));
        }

        Some(WireMessage::PlanApprovalRequest {
            request_id,
            from,
            plan,
            task_id,
            ..
        }) => {
            let preview = truncate_chars(&plan, PLAN_PREVIEW_CHARS, "…");
            rt.pending_plans
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(
                    from.clone(),
                    PendingPlan {
                        request_id,
                        from: from.clone(),
                        plan,
                        task_id,
                    },
                );
            rt.ui
                .notify(&format!("{from} requests plan approval: {preview}"));
        }

        Some(WireMessage::PeerDmSent {
            from, to, summary, ..
        }) => {
            rt.ui.notify(&format!("{from} → {to}: {summary}"));
        }

        Some(WireMessage::IdleNotification {
            from,
            completed_task_id,
            failure_reason,
            ..
        }) => {
            if let Some(reason) = failure_reason {
                ensure_member_known(rt, &from).await?;
                let mut meta = HashMap::new();
                meta.insert(
                    "offlineReason".to_string(),
                    serde_json::Value::String(reason.clone()),
                );
                set_member_status(rt, &from, MemberStatus::Offline, Some(meta)).await?;
                rt.ui.notify(&format!("{from} went offline: {reason}"));
                return Ok(());
            }

            ensure_member_known(rt, &from).await?;
            let desired = desired_session_name(&rt.cfg.style, &from);

            // Resync the cosmetic session name when it drifted.
            let team = rt.team.clone();
            let member_name = from.clone();
            let stored = LeaderRuntime::blocking(move || {
                Ok(team.load()?.and_then(|c| {
                    c.member(&member_name)
                        .and_then(|m| m.meta.get("sessionName").cloned())
                }))
            })
            .await?;
            let stored_name = stored.as_ref().and_then(|v| v.as_str().map(String::from));
            let mut meta = HashMap::new();
            if stored_name.as_deref() != Some(desired.as_str()) {
                rt.post_to_worker(&from, &WireMessage::SetSessionName {
                    name: desired.clone(),
                })
                .await?;
                meta.insert(
                    "sessionName".to_string(),
                    serde_json::Value::String(desired),
                );
            }
            set_member_status(
                rt,
                &from,
                MemberStatus::Online,
                if meta.is_empty() { None } else { Some(meta) },
            )
            .await?;

            if let Some(task_id) = completed_task_id {
                rt.ui
                    .notify(&format!("{from} finished task #{task_id} and is idle"));
            }
        }

        // Plain DMs and unknown structured messages alike.
        _ => {
            let preview = truncate_chars(msg.text.trim(), 200, "…");
            rt.ui
                .notify(&format!("Message from {}: {preview}", msg.from));
        }
    }
    Ok(())
}
