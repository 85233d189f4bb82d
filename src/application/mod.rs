pub mod ambient_resolver;
pub mod bootstrap;
pub mod cell;
pub mod clock;
pub mod commands;
pub mod here_and_now;
pub mod pomodoro;
