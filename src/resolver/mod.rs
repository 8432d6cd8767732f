//! Ticket identifier resolution from reply context.
//!
//! Replies reference a ticket either through an "ID: n" marker in the quoted
//! text (status messages and reminders carry one) or through the quoted
//! message's correlation keys, which the store indexes.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::store::TicketStore;
use crate::transport::QuotedMessage;

/// "ID: 42", "(ID: 42)", case-insensitive. Asterisk markup is stripped first.
static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(?\s*id:\s*(\d+)\s*\)?").expect("valid id pattern"));

/// Resolve the ticket a quoted message refers to.
///
/// A `None` result is non-fatal: the caller falls back to a "could not
/// identify the ticket" notice. Store failures do propagate.
pub fn extract_identifier(quoted: &QuotedMessage, store: &TicketStore) -> Result<Option<i64>> {
    // 1) Explicit "ID: n" in the quoted text wins.
    let stripped = quoted.text.replace('*', "");
    if let Some(caps) = ID_PATTERN.captures(&stripped) {
        if let Ok(id) = caps[1].parse::<i64>() {
            debug!("resolved ticket {id} from quoted text");
            return Ok(Some(id));
        }
    }

    // 2) Correlation key assigned by the engine at creation time.
    if let Some(unique_id) = quoted.unique_id.as_deref() {
        if let Some(ticket) = store.find_by_unique_message_id(unique_id)? {
            debug!("resolved ticket {} via unique message id", ticket.id);
            return Ok(Some(ticket.id));
        }
    }

    // 3) Transport-side id of the original report message.
    if let Some(original_id) = quoted.original_id.as_deref() {
        if let Some(ticket) = store.find_by_original_msg_id(original_id)? {
            debug!("resolved ticket {} via original message id", ticket.id);
            return Ok(Some(ticket.id));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Team;
    use crate::store::NewTicket;

    fn quoted(text: &str, unique_id: Option<&str>, original_id: Option<&str>) -> QuotedMessage {
        QuotedMessage {
            text: text.to_string(),
            unique_id: unique_id.map(String::from),
            original_id: original_id.map(String::from),
        }
    }

    fn store_with_ticket() -> (TicketStore, i64) {
        let store = TicketStore::open_in_memory().unwrap();
        let id = store
            .create(&NewTicket {
                unique_message_id: "uniq-abc".into(),
                original_msg_id: "orig-xyz".into(),
                description: "sin internet en recepcion".into(),
                reporter_id: "reporter@c.us".into(),
                categories: vec![Team::It],
                origin_channel: "origin@g.us".into(),
                media: None,
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn id_pattern_wins_regardless_of_markup() {
        let (store, _) = store_with_ticket();
        let q = quoted("*Recordatorio: tarea incompleta (ID: 42)*", None, None);
        assert_eq!(extract_identifier(&q, &store).unwrap(), Some(42));

        let q = quoted("detalles de la incidencia id: 7", None, None);
        assert_eq!(extract_identifier(&q, &store).unwrap(), Some(7));
    }

    #[test]
    fn falls_back_to_unique_message_id() {
        let (store, id) = store_with_ticket();
        let q = quoted("mensaje sin marcador", Some("uniq-abc"), None);
        assert_eq!(extract_identifier(&q, &store).unwrap(), Some(id));
    }

    #[test]
    fn falls_back_to_original_msg_id_last() {
        let (store, id) = store_with_ticket();
        let q = quoted("mensaje sin marcador", Some("no-match"), Some("orig-xyz"));
        assert_eq!(extract_identifier(&q, &store).unwrap(), Some(id));
    }

    #[test]
    fn unresolvable_reply_is_none_not_error() {
        let (store, _) = store_with_ticket();
        let q = quoted("sin referencia alguna", Some("nope"), Some("nada"));
        assert_eq!(extract_identifier(&q, &store).unwrap(), None);
    }
}
