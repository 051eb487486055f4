mod dispatcher;

pub use dispatcher::{PublishDispatcher, PublishReport};
