pub mod actuator;
pub mod chrome;
pub mod dispatcher;
pub mod resolver;
