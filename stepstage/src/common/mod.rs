pub mod output_port;
pub mod uart;
pub mod uart_comm;
