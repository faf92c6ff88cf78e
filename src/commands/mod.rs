pub mod organize_commands;
pub mod processing_controller;
