//! Per-channel LED state machine: status, activity, identify.

/// Which physical LEDs a board actually wires up for a channel. Activity
/// indication degrades gracefully as fewer LEDs are present (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LedOutputs {
    /// Separate state, RX-activity and TX-activity LEDs.
    StateAndTwoActivity,
    /// State LED plus one shared activity LED for both directions.
    StateAndSharedActivity,
    /// Only a state LED; it inverts during activity.
    StateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Event {
    Tick,
    Started,
    Stopped,
    ActivityRx,
    ActivityTx,
    IdentifyOn,
    IdentifyOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
enum State {
    NormalStopped,
    NormalStarted,
    Identify,
}

/// Ticks an activity LED stays on after being armed.
const ACTIVITY_TICKS: u8 = 2;
/// Ticks per identify blink half-period (on + off = 20 ticks total, ~1 Hz
/// at the spec's 50 ms tick).
const IDENTIFY_PERIOD_TICKS: u8 = 10;

/// Current output levels for a channel's LEDs, recomputed on every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct LedLevels {
    pub state: bool,
    pub rx_activity: bool,
    pub tx_activity: bool,
}

pub struct LedStateMachine {
    outputs: LedOutputs,
    state: State,
    was_started: bool,
    rx_ticks_remaining: u8,
    tx_ticks_remaining: u8,
    identify_tick: u8,
}

impl LedStateMachine {
    pub fn new(outputs: LedOutputs) -> Self {
        Self {
            outputs,
            state: State::NormalStopped,
            was_started: false,
            rx_ticks_remaining: 0,
            tx_ticks_remaining: 0,
            identify_tick: 0,
        }
    }

    pub fn handle(&mut self, event: Event) -> LedLevels {
        match event {
            Event::IdentifyOn => {
                self.state = State::Identify;
                self.identify_tick = 0;
            }
            Event::IdentifyOff => {
                self.state = if self.was_started {
                    State::NormalStarted
                } else {
                    State::NormalStopped
                };
            }
            Event::Started => {
                self.was_started = true;
                if self.state != State::Identify {
                    self.state = State::NormalStarted;
                }
            }
            Event::Stopped => {
                self.was_started = false;
                self.rx_ticks_remaining = 0;
                self.tx_ticks_remaining = 0;
                if self.state != State::Identify {
                    self.state = State::NormalStopped;
                }
            }
            Event::ActivityRx => {
                if self.state == State::NormalStarted && self.rx_ticks_remaining == 0 {
                    self.rx_ticks_remaining = ACTIVITY_TICKS;
                }
            }
            Event::ActivityTx => {
                if self.state == State::NormalStarted && self.tx_ticks_remaining == 0 {
                    self.tx_ticks_remaining = ACTIVITY_TICKS;
                }
            }
            Event::Tick => {
                self.rx_ticks_remaining = self.rx_ticks_remaining.saturating_sub(1);
                self.tx_ticks_remaining = self.tx_ticks_remaining.saturating_sub(1);
                if self.state == State::Identify {
                    self.identify_tick = (self.identify_tick + 1) % (IDENTIFY_PERIOD_TICKS * 2);
                }
            }
        }
        self.levels()
    }

    fn levels(&self) -> LedLevels {
        match self.state {
            State::NormalStopped => LedLevels::default(),
            State::NormalStarted => {
                // The countdown starts at ACTIVITY_TICKS on arm, turns the
                // LED on at its midpoint, and off again at zero.
                let rx_on = self.rx_ticks_remaining == ACTIVITY_TICKS / 2;
                let tx_on = self.tx_ticks_remaining == ACTIVITY_TICKS / 2;
                match self.outputs {
                    LedOutputs::StateAndTwoActivity => LedLevels {
                        state: true,
                        rx_activity: rx_on,
                        tx_activity: tx_on,
                    },
                    LedOutputs::StateAndSharedActivity => LedLevels {
                        state: true,
                        rx_activity: rx_on || tx_on,
                        tx_activity: rx_on || tx_on,
                    },
                    LedOutputs::StateOnly => LedLevels {
                        state: !(rx_on || tx_on),
                        rx_activity: false,
                        tx_activity: false,
                    },
                }
            }
            State::Identify => {
                let on = self.identify_tick < IDENTIFY_PERIOD_TICKS;
                LedLevels {
                    state: on,
                    rx_activity: on,
                    tx_activity: on,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_normal_stopped_with_everything_off() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        let levels = fsm.handle(Event::Tick);
        assert_eq!(levels, LedLevels::default());
    }

    #[test]
    fn started_turns_state_led_on() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        let levels = fsm.handle(Event::Started);
        assert!(levels.state);
        assert!(!levels.rx_activity);
    }

    #[test]
    fn activity_turns_on_at_midpoint_and_off_at_zero() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        fsm.handle(Event::Started);
        let levels = fsm.handle(Event::ActivityRx);
        assert!(!levels.rx_activity, "not yet at the midpoint on arm");
        let levels = fsm.handle(Event::Tick);
        assert!(levels.rx_activity, "midpoint tick turns the LED on");
        let levels = fsm.handle(Event::Tick);
        assert!(!levels.rx_activity, "countdown reaching zero turns it off");
    }

    #[test]
    fn activity_event_during_active_window_is_dropped() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        fsm.handle(Event::Started);
        fsm.handle(Event::ActivityRx);
        fsm.handle(Event::Tick); // now at the midpoint, LED on
        // Re-trigger mid-window: if this restarted the countdown the LED
        // would turn on again one tick later instead of staying on track
        // to turn off now.
        fsm.handle(Event::ActivityRx);
        let levels = fsm.handle(Event::Tick);
        assert!(!levels.rx_activity);
    }

    #[test]
    fn shared_activity_led_serves_both_directions() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndSharedActivity);
        fsm.handle(Event::Started);
        fsm.handle(Event::ActivityTx);
        let levels = fsm.handle(Event::Tick);
        assert!(levels.rx_activity);
        assert!(levels.tx_activity);
    }

    #[test]
    fn state_led_inverts_for_activity_when_no_activity_led() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateOnly);
        fsm.handle(Event::Started);
        fsm.handle(Event::ActivityRx);
        let levels = fsm.handle(Event::Tick);
        assert!(!levels.state, "inverted during the midpoint activity window");
        let levels = fsm.handle(Event::Tick);
        assert!(levels.state, "back to normal once the window ends");
    }

    #[test]
    fn identify_overrides_any_state_and_blinks() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        fsm.handle(Event::Started);
        let levels = fsm.handle(Event::IdentifyOn);
        assert!(levels.state && levels.rx_activity && levels.tx_activity);
        let mut levels = levels;
        for _ in 0..IDENTIFY_PERIOD_TICKS {
            levels = fsm.handle(Event::Tick);
        }
        assert!(!levels.state, "half-period elapsed, LED should be in its off phase");
    }

    #[test]
    fn identify_off_returns_to_started_when_channel_was_started() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        fsm.handle(Event::Started);
        fsm.handle(Event::IdentifyOn);
        let levels = fsm.handle(Event::IdentifyOff);
        assert!(levels.state);
        assert!(!levels.rx_activity);
    }

    #[test]
    fn identify_off_returns_to_stopped_when_channel_was_stopped() {
        let mut fsm = LedStateMachine::new(LedOutputs::StateAndTwoActivity);
        fsm.handle(Event::IdentifyOn);
        let levels = fsm.handle(Event::IdentifyOff);
        assert_eq!(levels, LedLevels::default());
    }
}
