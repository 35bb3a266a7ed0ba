pub mod conversations;
pub mod messages;
pub mod user_profiles;
