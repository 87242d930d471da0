use std::sync::Arc;

use relay_storage::{
    DocumentStore, Snapshot, TicketId, TicketMessageRecord, TicketRecord, TicketRole,
    TicketStatus, UserId, append, fetch, fetch_records, paths,
};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, ensure};

use super::error::{
    EmptyFieldSnafu, ModerationResult, StorageSnafu, TicketClosedSnafu, TicketNotFoundSnafu,
    TicketNotOwnedSnafu,
};
use crate::clock::SharedClock;
use crate::live::LiveValue;

/// Support tickets as seen by their author, plus the operator operations the admin console uses.
#[derive(Clone)]
pub struct TicketDesk {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
}

impl TicketDesk {
    pub fn new(store: Arc<dyn DocumentStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Opens a ticket with the next serial number and its first user message.
    pub async fn open_ticket(
        &self,
        uid: &UserId,
        email: &str,
        subject: &str,
        first_message: &str,
    ) -> ModerationResult<TicketRecord> {
        let subject = subject.trim();
        let first_message = first_message.trim();
        ensure!(
            !subject.is_empty(),
            EmptyFieldSnafu {
                stage: "open-ticket",
                field: "subject",
            }
        );
        ensure!(
            !first_message.is_empty(),
            EmptyFieldSnafu {
                stage: "open-ticket",
                field: "message",
            }
        );

        let serial_number = self
            .all_tickets()
            .await?
            .iter()
            .map(|ticket| ticket.serial_number)
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        let now = self.clock.now_ms();
        let mut ticket = TicketRecord {
            id: TicketId::default(),
            serial_number,
            uid: uid.clone(),
            email: email.trim().to_string(),
            subject: subject.to_string(),
            status: TicketStatus::Open,
            created_at: now,
        };
        let key = append(self.store.as_ref(), &paths::tickets(), &ticket)
            .await
            .context(StorageSnafu {
                stage: "create-ticket",
            })?;
        ticket.id = TicketId::new(key);
        self.append_message(&ticket.id, TicketRole::User, first_message, "first-ticket-message")
            .await?;
        tracing::info!(%uid, ticket_id = %ticket.id, serial_number, "ticket opened");
        Ok(ticket)
    }

    /// Tickets authored by `uid`, newest first.
    pub async fn user_tickets(&self, uid: &UserId) -> ModerationResult<Vec<TicketRecord>> {
        let mut tickets: Vec<TicketRecord> = self
            .all_tickets()
            .await?
            .into_iter()
            .filter(|ticket| &ticket.uid == uid)
            .collect();
        tickets.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(tickets)
    }

    pub async fn ticket(&self, ticket_id: &TicketId) -> ModerationResult<TicketRecord> {
        let ticket = fetch::<TicketRecord>(self.store.as_ref(), &paths::ticket(ticket_id))
            .await
            .context(StorageSnafu {
                stage: "read-ticket",
            })?
            .context(TicketNotFoundSnafu {
                stage: "read-ticket",
                ticket_id: ticket_id.as_str(),
            })?;
        Ok(TicketRecord {
            id: ticket_id.clone(),
            ..ticket
        })
    }

    /// Messages of one ticket in timestamp order; readable whatever the status.
    pub async fn thread(&self, ticket_id: &TicketId) -> ModerationResult<Vec<TicketMessageRecord>> {
        let messages = fetch_records::<TicketMessageRecord>(
            self.store.as_ref(),
            &paths::ticket_messages(ticket_id),
        )
        .await
        .context(StorageSnafu {
            stage: "read-ticket-thread",
        })?;
        Ok(order_thread(messages))
    }

    /// Live thread for a ticket view.
    pub fn watch_thread(&self, ticket_id: &TicketId) -> ModerationResult<LiveValue<Vec<TicketMessageRecord>>> {
        LiveValue::spawn(
            self.store.as_ref(),
            paths::ticket_messages(ticket_id),
            Vec::new(),
            |snapshot: &Snapshot| order_thread(snapshot.records()),
        )
        .context(StorageSnafu {
            stage: "subscribe-ticket-thread",
        })
    }

    /// Adds a user message; a closed ticket is rejected before anything is written.
    pub async fn send_user_message(
        &self,
        uid: &UserId,
        ticket_id: &TicketId,
        content: &str,
    ) -> ModerationResult<()> {
        let ticket = self.ticket(ticket_id).await?;
        ensure!(
            &ticket.uid == uid,
            TicketNotOwnedSnafu {
                stage: "user-ticket-message",
                ticket_id: ticket_id.as_str(),
            }
        );
        ensure!(
            ticket.status == TicketStatus::Open,
            TicketClosedSnafu {
                stage: "user-ticket-message",
                ticket_id: ticket_id.as_str(),
            }
        );
        self.append_message(ticket_id, TicketRole::User, content, "user-ticket-message")
            .await
    }

    pub(crate) async fn all_tickets(&self) -> ModerationResult<Vec<TicketRecord>> {
        fetch_records::<TicketRecord>(self.store.as_ref(), &paths::tickets())
            .await
            .context(StorageSnafu {
                stage: "list-tickets",
            })
    }

    pub(crate) async fn post_operator_reply(&self, ticket_id: &TicketId, content: &str) -> ModerationResult<()> {
        self.ticket(ticket_id).await?;
        self.append_message(ticket_id, TicketRole::Admin, content, "operator-ticket-reply")
            .await
    }

    pub(crate) async fn set_status(&self, ticket_id: &TicketId, status: TicketStatus) -> ModerationResult<()> {
        self.ticket(ticket_id).await?;
        let mut fields = Map::new();
        let status_tag = match status {
            TicketStatus::Open => "open",
            TicketStatus::Closed => "closed",
        };
        fields.insert("status".into(), Value::from(status_tag));
        self.store
            .update(&paths::ticket(ticket_id), fields)
            .await
            .context(StorageSnafu {
                stage: "set-ticket-status",
            })?;
        tracing::info!(%ticket_id, ?status, "ticket status changed");
        Ok(())
    }

    async fn append_message(
        &self,
        ticket_id: &TicketId,
        role: TicketRole,
        content: &str,
        stage: &'static str,
    ) -> ModerationResult<()> {
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyFieldSnafu {
                stage,
                field: "content",
            }
        );
        let message = TicketMessageRecord {
            id: Default::default(),
            role,
            content: content.to_string(),
            timestamp: self.clock.now_ms(),
        };
        append(
            self.store.as_ref(),
            &paths::ticket_messages(ticket_id),
            &message,
        )
        .await
        .context(StorageSnafu { stage })?;
        Ok(())
    }
}

fn order_thread(mut messages: Vec<TicketMessageRecord>) -> Vec<TicketMessageRecord> {
    messages.sort_by_key(|message| message.timestamp);
    messages
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::moderation::ModerationError;
    use crate::testing::{Backend, eventually};

    fn desk(backend: &Backend) -> TicketDesk {
        TicketDesk::new(backend.shared_store(), backend.clock.clone())
    }

    #[tokio::test]
    async fn serial_numbers_follow_the_highest_existing_one() {
        let backend = Backend::new();
        let desk = desk(&backend);
        let uid = UserId::new("u1");

        let first = desk.open_ticket(&uid, "a@b.co", "Banned", "Why?").await.unwrap();
        let second = desk.open_ticket(&uid, "a@b.co", "Again", "Hello").await.unwrap();
        assert_eq!(first.serial_number, 1);
        assert_eq!(second.serial_number, 2);

        let thread = desk.thread(&first.id).await.unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].role, TicketRole::User);
        assert_eq!(thread[0].content, "Why?");
    }

    #[tokio::test]
    async fn closed_ticket_rejects_user_messages_without_writing() {
        let backend = Backend::new();
        let desk = desk(&backend);
        let uid = UserId::new("u1");
        let ticket = desk.open_ticket(&uid, "a@b.co", "Banned", "Why?").await.unwrap();
        desk.post_operator_reply(&ticket.id, "Spam.").await.unwrap();
        desk.set_status(&ticket.id, TicketStatus::Closed).await.unwrap();

        let writes = backend.store.write_count();
        let error = desk
            .send_user_message(&uid, &ticket.id, "But why?")
            .await
            .unwrap_err();
        assert!(matches!(error, ModerationError::TicketClosed { .. }));
        assert_eq!(backend.store.write_count(), writes);

        let thread = desk.thread(&ticket.id).await.unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].role, TicketRole::Admin);

        desk.set_status(&ticket.id, TicketStatus::Open).await.unwrap();
        desk.send_user_message(&uid, &ticket.id, "Thanks").await.unwrap();
        assert_eq!(desk.thread(&ticket.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn other_users_cannot_post_into_a_ticket() {
        let backend = Backend::new();
        let desk = desk(&backend);
        let ticket = desk
            .open_ticket(&UserId::new("u1"), "a@b.co", "Help", "Hi")
            .await
            .unwrap();
        let error = desk
            .send_user_message(&UserId::new("u2"), &ticket.id, "me too")
            .await
            .unwrap_err();
        assert!(matches!(error, ModerationError::TicketNotOwned { .. }));
    }

    #[tokio::test]
    async fn thread_is_ordered_by_timestamp_and_live() {
        let backend = Backend::new();
        let desk = desk(&backend);
        let uid = UserId::new("u1");
        backend.clock.set(5_000);
        let ticket = desk.open_ticket(&uid, "a@b.co", "Help", "second").await.unwrap();
        let live = desk.watch_thread(&ticket.id).unwrap();
        assert_eq!(live.get().len(), 1);

        backend.clock.set(1_000);
        desk.post_operator_reply(&ticket.id, "first").await.unwrap();
        eventually(|| live.get().len() == 2).await;
        let contents: Vec<String> = live.get().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first".to_string(), "second".to_string()]);

        backend.clock.advance(Duration::from_secs(1));
        assert_eq!(desk.user_tickets(&uid).await.unwrap().len(), 1);
    }
}
