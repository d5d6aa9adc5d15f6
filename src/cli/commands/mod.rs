mod create;
mod init;
mod plan;
mod rollback;

pub use create::execute_create;
pub use init::execute_init;
pub use plan::execute_plan;
pub use rollback::execute_rollback;
