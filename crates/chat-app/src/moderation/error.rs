use relay_storage::StorageError;
use snafu::Snafu;

pub type ModerationResult<T> = Result<T, ModerationError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ModerationError {
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("ticket '{ticket_id}' is closed on `{stage}`"))]
    TicketClosed {
        stage: &'static str,
        ticket_id: String,
    },
    #[snafu(display("ticket '{ticket_id}' not found on `{stage}`"))]
    TicketNotFound {
        stage: &'static str,
        ticket_id: String,
    },
    #[snafu(display("ticket '{ticket_id}' belongs to another user on `{stage}`"))]
    TicketNotOwned {
        stage: &'static str,
        ticket_id: String,
    },
    #[snafu(display("`{field}` must not be empty on `{stage}`"))]
    EmptyField {
        stage: &'static str,
        field: &'static str,
    },
}
