use super::frame::Reason;

const MAX_WINDOW: i64 = 0x7fff_ffff;

/// A send or receive flow-control window.
///
/// Can go negative when the peer lowers the initial window size while
/// data is in flight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    window: i64,
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Window {
            window: i64::from(initial),
        }
    }

    pub fn available(&self) -> u32 {
        self.window.max(0) as u32
    }

    /// Take `amount` from the window. Fails if the window would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), Reason> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(Reason::FlowControlError);
        }
        self.window = new;
        Ok(())
    }

    /// Take credit already checked with `available`.
    pub fn take(&mut self, amount: u32) {
        self.window -= i64::from(amount);
    }

    /// Give back credit previously consumed.
    pub fn release(&mut self, amount: u32) {
        self.window += i64::from(amount);
    }

    /// Grow by a WINDOW_UPDATE increment. Fails past the max window.
    pub fn increase(&mut self, increment: u32) -> Result<(), Reason> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW {
            return Err(Reason::FlowControlError);
        }
        self.window = new;
        Ok(())
    }

    /// Shift by the change of SETTINGS_INITIAL_WINDOW_SIZE.
    pub fn adjust(&mut self, delta: i64) -> Result<(), Reason> {
        let new = self.window + delta;
        if new > MAX_WINDOW {
            return Err(Reason::FlowControlError);
        }
        self.window = new;
        Ok(())
    }
}
