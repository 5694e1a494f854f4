pub mod engine;
pub mod scheduled;
pub mod store;

pub use engine::{PendingDeletion, TodoSyncEngine, TodoView};
pub use scheduled::ScheduledTask;
pub use store::{LocalTodoStore, RemoteTodoStore, StoreMode, TodoStore, TODOS_KEY};
