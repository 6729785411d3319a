pub mod line_server;
