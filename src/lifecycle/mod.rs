//! Lifecycle coordinator: orchestrates confirmation, cancellation and
//! feedback against the store, using the classifier and the identifier
//! resolver.
//!
//! Every mutation is committed to the store before any outbound notification
//! is attempted; notification fan-out is best-effort and never rolls a
//! transition back.

pub mod messages;

use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::classifier::{classify, Team};
use crate::config::AppConfig;
use crate::directory::UserDirectory;
use crate::error::{Result, TicketError};
use crate::keywords::{KeywordSet, KeywordStore};
use crate::resolver::extract_identifier;
use crate::store::{FeedbackKind, FeedbackRecord, NewTicket, Ticket, TicketState, TicketStore};
use crate::transport::{fan_out, ChannelRouting, ChatTransport, OutboundMessage, QuotedMessage};

/// One inbound chat event, as the transport hands it over.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Chat the message arrived in (group or direct conversation).
    pub channel: String,
    pub sender: String,
    pub text: String,
    /// Transport-side id of this message.
    pub message_id: String,
    pub is_group: bool,
    pub mentions: Vec<String>,
    pub quoted: Option<QuotedMessage>,
    /// Opaque media blob captured by the transport, stored as-is.
    pub media: Option<String>,
}

pub struct Coordinator {
    store: TicketStore,
    transport: Arc<dyn ChatTransport>,
    keywords: Arc<KeywordStore>,
    directory: Arc<UserDirectory>,
    routing: ChannelRouting,
    timezone: chrono_tz::Tz,
}

impl Coordinator {
    pub fn new(
        store: TicketStore,
        transport: Arc<dyn ChatTransport>,
        keywords: Arc<KeywordStore>,
        directory: Arc<UserDirectory>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            transport,
            keywords,
            directory,
            routing: config.channels.routing(),
            timezone: config.timezone,
        }
    }

    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    /// Swap in fresh keyword and directory snapshots from disk.
    pub fn reload_snapshots(&self) {
        self.keywords.reload();
        self.directory.reload();
    }

    /// Dispatch one inbound message. Failures are reported back to the
    /// requester; the step is aborted before any partial notification.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        let keywords = self.keywords.snapshot();

        let result = if msg.quoted.is_some() && self.is_cancellation(&keywords, msg) {
            self.on_cancellation_request(msg).await
        } else if self.quotes_feedback_request(msg) {
            self.on_feedback_response(msg).await
        } else if msg.quoted.is_some() && self.is_feedback_request(&keywords, msg) {
            self.on_feedback_request(msg).await
        } else if msg.quoted.is_some() && self.is_confirmation(&keywords, msg) {
            self.on_confirmation(msg).await
        } else {
            self.report_new(msg).await.map(|_| ())
        };

        if let Err(e) = result {
            error!("handling message from {} failed: {e}", msg.sender);
            let notice = match &e {
                TicketError::NotFound(id) => format!("No se encontró la incidencia ID {id}."),
                TicketError::PermissionDenied { .. } => {
                    "No tienes permisos para realizar esta acción.".to_string()
                }
                TicketError::PreconditionFailed { id, .. } => {
                    format!("La incidencia ID {id} ya no está pendiente.")
                }
                _ => "Ocurrió un error al procesar tu mensaje.".to_string(),
            };
            self.notify(&msg.channel, &messages::operation_failed(&notice)).await;
        }
    }

    fn is_cancellation(&self, keywords: &KeywordSet, msg: &InboundMessage) -> bool {
        keywords.cancellation.fuzzy_matches(&msg.text) || keywords.cancellation.has_phrase(&msg.text)
    }

    fn is_confirmation(&self, keywords: &KeywordSet, msg: &InboundMessage) -> bool {
        keywords.confirmation.has_word_token(&msg.text) || keywords.confirmation.has_phrase(&msg.text)
    }

    fn is_feedback_request(&self, keywords: &KeywordSet, msg: &InboundMessage) -> bool {
        keywords.retro.has_word_token(&msg.text) || keywords.retro.has_phrase(&msg.text)
    }

    /// A reply quoting a feedback request or reminder is a team's feedback
    /// response, regardless of its wording.
    fn quotes_feedback_request(&self, msg: &InboundMessage) -> bool {
        msg.quoted
            .as_ref()
            .map(|q| {
                let norm = crate::text::normalize(&q.text);
                norm.starts_with(messages::FEEDBACK_REQUEST_PREFIX)
                    || norm.starts_with(messages::REMINDER_PREFIX)
            })
            .unwrap_or(false)
    }

    /// Classify a fresh report and open a ticket. Returns `None` when no
    /// category matched and the reporter was asked to clarify.
    pub async fn report_new(&self, msg: &InboundMessage) -> Result<Option<i64>> {
        let keywords = self.keywords.snapshot();
        let directory = self.directory.snapshot();

        let categories = classify(&msg.text, &msg.mentions, &keywords, &directory);
        if categories.is_empty() {
            info!("no category detected for report from {}", msg.sender);
            self.notify(&msg.channel, &messages::clarification_prompt()).await;
            return Ok(None);
        }

        let new = NewTicket {
            unique_message_id: Uuid::new_v4().to_string(),
            original_msg_id: msg.message_id.clone(),
            description: msg.text.clone(),
            reporter_id: msg.sender.clone(),
            categories: categories.clone(),
            origin_channel: msg.channel.clone(),
            media: msg.media.clone(),
        };
        let id = self.store.create(&new)?;
        info!("ticket {id} created for teams [{}]", join_codes(&categories));

        // Ticket is durable; everything below is best-effort fan-out.
        let caption = messages::new_task_caption(id, &msg.text);
        let destinations: Vec<String> = categories
            .iter()
            .filter_map(|t| self.routing.destination(*t))
            .map(String::from)
            .collect();
        fan_out(
            self.transport.as_ref(),
            &destinations,
            &OutboundMessage::with_media(caption, msg.media.clone()),
        )
        .await;

        self.notify(&msg.channel, &messages::report_ack(id, &categories)).await;

        if !msg.is_group {
            let reporter = directory.label(&msg.sender);
            self.notify(
                self.routing.primary_channel(),
                &messages::direct_report_notice(id, &msg.text, &reporter, &categories),
            )
            .await;
        }
        Ok(Some(id))
    }

    /// A team acknowledges its portion of a ticket.
    pub async fn on_confirmation(&self, msg: &InboundMessage) -> Result<()> {
        let Some(id) = self.resolve_quoted(msg).await? else {
            return Ok(());
        };
        let ticket = self.load(id)?;

        // Confirmations from a team channel belong to that team; from a
        // direct chat the first required category is assumed, as the
        // original system does for ACK replies.
        let team = self
            .routing
            .team_for_channel(&msg.channel)
            .or_else(|| ticket.categories.first().copied())
            .ok_or_else(|| TicketError::Validation("ticket has no categories".into()))?;

        let now = Utc::now();
        let record = FeedbackRecord {
            user_id: msg.sender.clone(),
            team: Some(team),
            comment: msg.text.clone(),
            timestamp: now,
            kind: FeedbackKind::Confirmation,
        };

        // The duplicate check and the write happen atomically in the store;
        // a losing concurrent confirmation lands here as AlreadyConfirmed.
        let updated = match self.store.record_confirmation(id, team, record) {
            Err(TicketError::AlreadyConfirmed { .. }) => {
                info!("duplicate confirmation for ticket {id} by {}", team.code());
                self.notify(&msg.channel, &messages::already_confirmed_notice(id, team))
                    .await;
                return Ok(());
            }
            other => other?,
        };

        let directory = self.directory.snapshot();
        let when = messages::format_date(now, self.timezone);

        if updated.categories.len() == 1 {
            // No intermediate partial phase for single-team tickets.
            let name = directory.display_name(&msg.sender);
            self.store.complete(id, &msg.sender, &name, now, "1/1")?;
            self.notify(&msg.channel, &messages::completed_ack(id, &name, &when)).await;
            self.broadcast_status(
                &updated,
                &messages::final_summary(&updated, &name, now, "1/1", self.timezone),
            )
            .await;
            return Ok(());
        }

        let confirmed = updated.confirmed_teams();
        let outstanding = updated.outstanding_teams();
        let phase = updated.phase_string();
        let names = self.confirmer_names(&updated, &confirmed);

        if outstanding.is_empty() {
            self.store.complete(id, &msg.sender, &names, now, &phase)?;
            self.notify(&msg.channel, &messages::completed_ack(id, &names, &when)).await;
            self.broadcast_status(
                &updated,
                &messages::final_summary(&updated, &names, now, &phase, self.timezone),
            )
            .await;
        } else {
            self.store.update_phase(id, &phase)?;
            let ack_name = directory.display_name(&msg.sender);
            self.notify(&msg.channel, &messages::confirm_ack(id, &phase, &ack_name, &when))
                .await;
            self.broadcast_status(
                &updated,
                &messages::partial_status(&updated, &confirmed, &outstanding, &names, &phase, now),
            )
            .await;
        }
        Ok(())
    }

    /// The reporter (or an admin) withdraws a Pending ticket.
    pub async fn on_cancellation_request(&self, msg: &InboundMessage) -> Result<()> {
        let Some(id) = self.resolve_quoted(msg).await? else {
            return Ok(());
        };
        let ticket = self.load(id)?;
        let directory = self.directory.snapshot();

        if msg.sender != ticket.reporter_id && !directory.is_admin(&msg.sender) {
            return Err(TicketError::PermissionDenied {
                user: msg.sender.clone(),
                action: format!("cancel ticket {id}"),
            });
        }

        // Conditional write: a ticket that already reached a terminal state
        // surfaces PreconditionFailed here, never silent success.
        self.store.cancel(id)?;
        info!("ticket {id} cancelled by {}", msg.sender);

        let who = directory.label(&msg.sender);
        self.notify(&msg.channel, &messages::cancellation_ack(id, &who)).await;

        let mut channels = vec![ticket.origin_channel.clone()];
        for team in &ticket.categories {
            if let Some(dest) = self.routing.destination(*team) {
                channels.push(dest.to_string());
            }
        }
        if ticket.origin_channel != self.routing.primary_channel() {
            channels.push(self.routing.primary_channel().to_string());
        }
        channels.sort();
        channels.dedup();

        fan_out(
            self.transport.as_ref(),
            &channels,
            &OutboundMessage::text(messages::cancellation_notice(id, &ticket.description, &who)),
        )
        .await;
        Ok(())
    }

    /// Ask the not-yet-confirmed teams for an update.
    pub async fn on_feedback_request(&self, msg: &InboundMessage) -> Result<()> {
        let Some(id) = self.resolve_quoted(msg).await? else {
            return Ok(());
        };
        let ticket = self.load(id)?;

        if ticket.state == TicketState::Cancelled {
            return Err(TicketError::PreconditionFailed {
                id,
                state: ticket.state.as_str().to_string(),
            });
        }

        let created = messages::format_date(ticket.created_at, self.timezone);
        // Teams that already confirmed are skipped to avoid redundant asks.
        for team in ticket.outstanding_teams() {
            let Some(dest) = self.routing.destination(team) else {
                warn!("no destination channel configured for {}", team.code());
                continue;
            };
            self.notify(
                dest,
                &messages::feedback_request(id, team, &ticket.description, &created),
            )
            .await;
        }

        self.notify(&msg.channel, &messages::feedback_request_ack(id)).await;
        Ok(())
    }

    /// A team (or the reporter) replies with an update that does not close
    /// out its portion. State and phase are untouched.
    pub async fn on_feedback_response(&self, msg: &InboundMessage) -> Result<()> {
        let Some(id) = self.resolve_quoted(msg).await? else {
            return Ok(());
        };
        let ticket = self.load(id)?;

        let team = self.routing.team_for_channel(&msg.channel);
        self.store.append_feedback(
            id,
            FeedbackRecord {
                user_id: msg.sender.clone(),
                team,
                comment: msg.text.clone(),
                timestamp: Utc::now(),
                kind: FeedbackKind::FeedbackResponse,
            },
        )?;

        let responder_tag = team
            .map(|t| t.label().to_uppercase())
            .unwrap_or_else(|| "ORIGEN".to_string());
        let feedback = messages::feedback_received(id, &ticket.description, &responder_tag, &msg.text);

        let mut targets = vec![ticket.origin_channel.clone()];
        if !self.routing.is_known_group(&ticket.origin_channel) {
            // Origin was a direct conversation: copy the reporter as well.
            targets.push(ticket.reporter_id.clone());
        }
        targets.sort();
        targets.dedup();
        fan_out(self.transport.as_ref(), &targets, &OutboundMessage::text(feedback)).await;

        let directory = self.directory.snapshot();
        let recipient = directory.label(&ticket.reporter_id);
        self.notify(&msg.channel, &messages::feedback_response_ack(id, &recipient)).await;
        Ok(())
    }

    /// Reconciliation path for post-submission edits of the originating
    /// message: recompute categories and description. Already-confirmed
    /// teams are never dropped from the category set.
    pub async fn reconcile_edit(&self, original_msg_id: &str, new_text: &str) -> Result<()> {
        let Some(ticket) = self.store.find_by_original_msg_id(original_msg_id)? else {
            return Ok(());
        };

        let keywords = self.keywords.snapshot();
        let directory = self.directory.snapshot();
        let classified = classify(new_text, &[], &keywords, &directory);

        if !classified.is_empty() {
            let mut new_categories = classified;
            for team in ticket.confirmed_teams() {
                if !new_categories.contains(&team) {
                    new_categories.push(team);
                }
            }
            if new_categories != ticket.categories {
                self.store.update_categories(ticket.id, &new_categories)?;
                info!(
                    "ticket {} recategorized: {} -> {}",
                    ticket.id,
                    join_codes(&ticket.categories),
                    join_codes(&new_categories)
                );
                self.notify(
                    self.routing.primary_channel(),
                    &messages::recategorized_notice(
                        ticket.id,
                        &join_codes(&ticket.categories),
                        &join_codes(&new_categories),
                    ),
                )
                .await;
            }
        }

        self.store.update_description(ticket.id, new_text)?;
        Ok(())
    }

    /// Resolve the quoted ticket; a miss is degraded to a notice, not an
    /// error.
    async fn resolve_quoted(&self, msg: &InboundMessage) -> Result<Option<i64>> {
        let Some(quoted) = msg.quoted.as_ref() else {
            self.notify(&msg.channel, &messages::could_not_identify()).await;
            return Ok(None);
        };
        match extract_identifier(quoted, &self.store)? {
            Some(id) => Ok(Some(id)),
            None => {
                self.notify(&msg.channel, &messages::could_not_identify()).await;
                Ok(None)
            }
        }
    }

    fn load(&self, id: i64) -> Result<Ticket> {
        self.store.get_by_id(id)?.ok_or(TicketError::NotFound(id))
    }

    /// Distinct display names of the users who confirmed the given teams,
    /// comma-joined in team order.
    fn confirmer_names(&self, ticket: &Ticket, confirmed: &[Team]) -> String {
        let directory = self.directory.snapshot();
        let mut names: Vec<String> = Vec::new();
        for team in confirmed {
            let confirmer = ticket
                .feedback_history
                .iter()
                .rev()
                .find(|r| r.team == Some(*team) && r.kind == FeedbackKind::Confirmation)
                .map(|r| directory.display_name(&r.user_id));
            if let Some(name) = confirmer {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.join(", ")
    }

    /// Status messages go to the origin channel and the primary channel.
    async fn broadcast_status(&self, ticket: &Ticket, text: &str) {
        let mut channels = vec![ticket.origin_channel.clone()];
        if ticket.origin_channel != self.routing.primary_channel() {
            channels.push(self.routing.primary_channel().to_string());
        }
        fan_out(
            self.transport.as_ref(),
            &channels,
            &OutboundMessage::text(text.to_string()),
        )
        .await;
    }

    /// Best-effort single delivery; failures are logged, never propagated.
    async fn notify(&self, channel: &str, text: &str) {
        if let Err(e) = self
            .transport
            .deliver(channel, &OutboundMessage::text(text.to_string()))
            .await
        {
            error!("notification to {channel} failed: {e}");
        }
    }
}

fn join_codes(teams: &[Team]) -> String {
    teams.iter().map(Team::code).collect::<Vec<_>>().join(",")
}
