mod error;

pub mod directory;
pub mod simulator;
pub mod stream;
pub mod typing;
pub mod view;

pub use directory::{
    DirectoryView, DropPlan, DropTarget, FolderDeleteMode, FolderGroup, SessionDirectory,
    SortMode, ViewOptions,
};
pub use error::{ChatError, ChatResult};
pub use simulator::{DelayWindow, ReplyOutcome, ReplyTurn, ResponseSimulator};
pub use stream::{MessageStream, MessageView, StreamTarget};
pub use typing::{TypingRejection, TypingState, TypingTransition};
pub use view::{ChatServices, ChatView, ComposerInput, ComposerState, ImageAttachment, SendReceipt};

