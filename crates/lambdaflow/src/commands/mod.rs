pub mod deploy;
pub mod package;
pub mod plan;
pub mod publish_layer;
pub mod validate;
pub mod wipe_table;
