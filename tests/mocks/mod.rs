mod mock_backend;
mod mock_router;

pub use self::mock_backend::{check, check_with_others, MockBackend};
pub use self::mock_router::MockRouter;
