pub mod api;
pub mod queue_item;
pub mod record;
