pub mod apply_service;
pub mod bookmark_store;
pub mod decision_service;
pub mod folder_strategy;
pub mod oracle_service;
pub mod scan_service;
pub mod settings_service;
pub mod url_service;
