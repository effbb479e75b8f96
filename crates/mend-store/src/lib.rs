pub mod paths;
pub mod store;

pub use paths::{data_root, default_db_path};
pub use store::{
    CasOutcome, ConversationMessage, IssueStore, MessageRole, NewMessage, Proposal, StoreError,
};
