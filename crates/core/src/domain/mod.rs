pub mod email;
pub mod entity;
pub mod outcome;
pub mod token;
