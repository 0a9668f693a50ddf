use snafu::Snafu;

use super::ids::ConversationId;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("conversation '{id}' was not found"))]
    ConversationNotFound {
        stage: &'static str,
        id: ConversationId,
    },
    #[snafu(display("no model is selected"))]
    NoModelSelected { stage: &'static str },
    #[snafu(display("message is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("model '{model_id}' is not in the catalog"))]
    UnknownModel {
        stage: &'static str,
        model_id: String,
    },
}
