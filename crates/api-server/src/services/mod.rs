pub mod reels;
pub mod users;

pub use reels::ReelService;
pub use users::UserService;
