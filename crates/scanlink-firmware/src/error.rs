use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("radio initialisation failed")]
    Radio,
    #[error("UART initialisation failed")]
    Uart,
    #[error("socket read failed")]
    Read,
    #[error("socket write failed")]
    Write,
    #[error("peer closed the connection")]
    ConnectionClosed,
}
