//! Async face for a blocking UART.
//!
//! The modem link runs at 9600 baud from a low-priority task. Reads yield to
//! the executor until the RX FIFO has data; writes drain synchronously, which
//! is fine because the sampler preempts from its own interrupt executor.

use embassy_time::Timer;

pub struct AsyncSerial<U> {
    uart: U,
}

impl<U> AsyncSerial<U> {
    pub fn new(uart: U) -> Self {
        Self { uart }
    }
}

impl<U: embedded_io::ErrorType> embedded_io_async::ErrorType for AsyncSerial<U> {
    type Error = U::Error;
}

impl<U> embedded_io_async::Read for AsyncSerial<U>
where
    U: embedded_io::Read + embedded_io::ReadReady,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        while !self.uart.read_ready()? {
            Timer::after_millis(1).await;
        }
        self.uart.read(buf)
    }
}

impl<U: embedded_io::ReadReady> embedded_io_async::ReadReady for AsyncSerial<U> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.uart.read_ready()
    }
}

impl<U: embedded_io::Write> embedded_io_async::Write for AsyncSerial<U> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write(buf)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.flush()
    }
}
