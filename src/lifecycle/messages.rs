//! User-facing message templates and date formatting.
//!
//! Templates are Spanish, matching the vocabulary the keyword dictionaries
//! are built for. Feedback requests and reminders carry an "ID: n" marker so
//! replies that quote them stay resolvable.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::classifier::Team;
use crate::store::{FeedbackKind, Ticket};

/// Normalized prefixes that mark a quoted message as a feedback request or
/// reminder; replies quoting these are team feedback responses.
pub const FEEDBACK_REQUEST_PREFIX: &str = "solicitud de retroalimentacion";
pub const REMINDER_PREFIX: &str = "recordatorio";

pub fn format_date(date: DateTime<Utc>, tz: Tz) -> String {
    date.with_timezone(&tz).format("%d/%m/%Y %H:%M:%S").to_string()
}

/// "2d 3h 15m" elapsed between two instants.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let total_minutes = (end - start).num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;
    format!("{days}d {hours}h {minutes}m")
}

fn team_tags(teams: &[Team]) -> String {
    if teams.is_empty() {
        "Ninguno".to_string()
    } else {
        teams
            .iter()
            .map(|t| t.emoji_label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Prompt sent when classification finds no team: the report is not dropped,
/// the reporter is asked to restate it.
pub fn clarification_prompt() -> String {
    let mut out = String::from(
        "*🤖 No detecté ninguna incidencia en tu mensaje.*\n\n\
         *Por favor indica a qué área va dirigida:*\n\n",
    );
    for team in Team::ALL {
        out.push_str(&format!("▫️ {}\n", team.label()));
    }
    out.push_str("\n_Vuelve a intentarlo con un mensaje más claro._");
    out
}

/// Caption used when forwarding a new report to a team channel.
pub fn new_task_caption(id: i64, description: &str) -> String {
    format!("*Nueva tarea recibida (ID: {id}):*\n\n✅ *{description}*")
}

/// Acknowledgment sent back to the reporter.
pub fn report_ack(id: i64, teams: &[Team]) -> String {
    let names: Vec<&str> = teams.iter().map(|t| t.label()).collect();
    let list = names.join(" y ");
    format!("🤖 *El mensaje se ha enviado al equipo:*\n\n✅ {list}\n\n*ID:* {id}")
}

/// Primary-channel notice for reports that arrived through a direct chat.
pub fn direct_report_notice(id: i64, description: &str, reporter: &str, teams: &[Team]) -> String {
    format!(
        "*Nueva incidencia (ID: {id})*\n\n{description}\n\n\
         *Reportada por:* {reporter}\n\n*Enviada a:* {}",
        team_tags(teams)
    )
}

pub fn confirm_ack(id: i64, phase: &str, name: &str, when: &str) -> String {
    format!("🤖✅ *Incidencia (ID: {id}) confirmada fase {phase} por {name} el {when}*")
}

pub fn completed_ack(id: i64, name: &str, when: &str) -> String {
    format!("🤖✅ *Incidencia (ID: {id}) completada por {name} el {when}*")
}

/// Idempotent notice for a team confirming twice.
pub fn already_confirmed_notice(id: i64, team: Team) -> String {
    format!(
        "🤖 *La incidencia (ID: {id}) ya fue confirmada por {}.*",
        team.emoji_label()
    )
}

/// Latest comment a team left on the ticket, with the original's fallbacks.
fn latest_comment(ticket: &Ticket, team: Team) -> String {
    let record = ticket
        .feedback_history
        .iter()
        .rev()
        .find(|r| r.team == Some(team));
    match record {
        Some(r) if !r.comment.trim().is_empty() => r.comment.trim().to_string(),
        Some(r) if r.kind == FeedbackKind::Confirmation => "Listo".to_string(),
        _ => "Sin comentarios".to_string(),
    }
}

/// Partial-status message: confirmed vs outstanding teams, latest per-team
/// comment, elapsed time since creation.
pub fn partial_status(
    ticket: &Ticket,
    confirmed: &[Team],
    outstanding: &[Team],
    confirmer_names: &str,
    phase: &str,
    now: DateTime<Utc>,
) -> String {
    let mut comments = String::new();
    for team in &ticket.categories {
        comments.push_str(&format!(
            "{}: {}\n",
            team.emoji_label(),
            latest_comment(ticket, *team)
        ));
    }

    format!(
        "❗❗❗❗❗❗❗❗❗❗❗❗\n\
         🤖🟡 *ATENCIÓN TAREA EN FASE {phase}*\n\n\
         *Tarea de {}*:\n\n{}\n\n\
         *🟢 Confirmado:* {}\n\
         *👤 Confirmado por:* {}\n\n\
         *🔴 Falta:* {}\n\n\
         *💬 Comentarios:*\n{}\n\
         *⏱️ Tiempo transcurrido:* {}\n\n\
         *ID:* {}",
        team_tags(&ticket.categories),
        ticket.description,
        team_tags(confirmed),
        if confirmer_names.is_empty() { "Ninguno" } else { confirmer_names },
        team_tags(outstanding),
        comments,
        format_duration(ticket.created_at, now),
        ticket.id,
    )
}

/// Final summary: creation/conclusion stamps, per-team and total durations.
pub fn final_summary(
    ticket: &Ticket,
    completed_by_name: &str,
    completed_at: DateTime<Utc>,
    phase: &str,
    tz: Tz,
) -> String {
    let mut per_team = String::new();
    for team in &ticket.categories {
        let elapsed = ticket
            .confirmations
            .get(team)
            .map(|ts| format_duration(ticket.created_at, *ts))
            .unwrap_or_else(|| "—".to_string());
        per_team.push_str(&format!("*⌛Tiempo {}:* {elapsed}\n", team.emoji_label()));
    }

    format!(
        "❗❗❗❗❗❗❗❗❗❗❗❗\n\
         *🤖✅ ATENCIÓN FASE {phase} ✅🤖*\n\n\
         *Tarea de {}*:\n\n{}\n\n\
         *ha sido COMPLETADA*\n\n\
         *📅Creación:* {}\n\
         *📅Conclusión:* {}\n\n\
         *👤 Completado por:* {completed_by_name}\n\n\
         *⏱️ Total:* {}\n{per_team}\n\
         *ID:* {}\n\n\
         *MUCHAS GRACIAS POR SU PACIENCIA* 😊",
        team_tags(&ticket.categories),
        ticket.description,
        format_date(ticket.created_at, tz),
        format_date(completed_at, tz),
        format_duration(ticket.created_at, completed_at),
        ticket.id,
    )
}

pub fn cancellation_ack(id: i64, who: &str) -> String {
    format!("🤖✅ La incidencia ID: {id} ha sido cancelada por {who}")
}

pub fn cancellation_notice(id: i64, description: &str, who: &str) -> String {
    format!("🤖 *La incidencia ID {id}:* {description}\n\n*Ha sido cancelada por {who}.*")
}

pub fn feedback_request(id: i64, team: Team, description: &str, created: &str) -> String {
    format!(
        "📝 *SOLICITUD DE RETROALIMENTACIÓN*\n\n\
         *ID:* {id}\n\
         *Categoría:* {}\n\
         *Creada:* {created}\n\n\
         {description}\n\n\
         _Por favor, respondan citando este mensaje con su retroalimentación._",
        team.label().to_uppercase()
    )
}

pub fn feedback_request_ack(id: i64) -> String {
    format!("✅ Solicitud de retroalimentación enviada para la incidencia ID {id}.")
}

pub fn feedback_received(id: i64, description: &str, responder_tag: &str, response: &str) -> String {
    format!(
        "💬 *Feedback recibido (ID {id}):*\n\
         ✍️ *Tarea*:\n{description}\n\n\
         🗣️ *{responder_tag} responde:*\n{response}"
    )
}

pub fn feedback_response_ack(id: i64, recipient: &str) -> String {
    format!("💬 Feedback enviado (ID {id}):\nDestinatario:\n👤 {recipient}")
}

pub fn recategorized_notice(id: i64, old: &str, new: &str) -> String {
    format!("*Incidencia {id} recategorizada:* {old} → {new}")
}

pub fn could_not_identify() -> String {
    "❌ No pude identificar la incidencia referida.".to_string()
}

pub fn operation_failed(reason: &str) -> String {
    format!("❌ {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_formatting() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 13, 45, 0).unwrap();
        assert_eq!(format_duration(start, end), "1d 3h 45m");
        assert_eq!(format_duration(end, start), "0d 0h 0m");
    }

    #[test]
    fn date_formatting_uses_property_timezone() {
        let date = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        let formatted = format_date(date, chrono_tz::America::Hermosillo);
        // Hermosillo is UTC-7 with no DST.
        assert_eq!(formatted, "01/03/2026 11:30:00");
    }

    #[test]
    fn feedback_request_keeps_id_resolvable() {
        let text = feedback_request(42, Team::It, "sin internet", "01/03/2026 10:00:00");
        assert!(text.contains("*ID:* 42"));
        assert!(crate::text::normalize(&text).starts_with(FEEDBACK_REQUEST_PREFIX));
    }

    #[test]
    fn clarification_prompt_lists_every_area() {
        let prompt = clarification_prompt();
        for team in Team::ALL {
            assert!(prompt.contains(team.label()));
        }
    }
}
