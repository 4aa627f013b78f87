use core::convert::Infallible;
use embedded_hal::digital::OutputPin;

/// The heater relay.
///
/// Takes any infallible output pin, so driving it cannot fail. Starts off.
pub struct Relay<P> {
    pin: P,
    active_high: bool,
    on: bool,
}

impl<P: OutputPin<Error = Infallible>> Relay<P> {
    pub fn new(pin: P, active_high: bool) -> Self {
        let mut relay = Relay {
            pin,
            active_high,
            on: false,
        };
        relay.drive(false);
        relay
    }

    pub fn set(&mut self, on: bool) {
        if on != self.on {
            self.drive(on);
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    fn drive(&mut self, on: bool) {
        let Ok(()) = if on == self.active_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        self.on = on;
    }
}
