pub mod import_task;
