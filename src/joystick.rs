//! The canonical, protocol-capped snapshot of the attached controllers.
//!
//! The registry does not talk to any hardware. An external enumerator (SDL,
//! gilrs, a virtual keyboard joystick) registers sticks and pushes normalized
//! values in; the active protocol reads the snapshot out when encoding robot
//! packets.

use tracing::debug;

/// Per-protocol limits applied to registered joysticks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct JoystickCaps {
    pub joysticks: usize,
    pub axes: usize,
    pub buttons: usize,
    pub povs: usize,
}

impl Default for JoystickCaps {
    fn default() -> JoystickCaps {
        JoystickCaps {
            joysticks: 6,
            axes: 12,
            buttons: 24,
            povs: 12,
        }
    }
}

/// A registered controller. The `real_*` fields record what the host
/// offered; the vectors are capped to what the active protocol can encode.
#[derive(Debug, Clone, PartialEq)]
pub struct Joystick {
    pub real_axes: usize,
    pub real_buttons: usize,
    pub real_povs: usize,
    /// Axis values in `[-1, 1]`.
    pub axes: Vec<f32>,
    pub buttons: Vec<bool>,
    /// POV angles in degrees, `-1` when released.
    pub povs: Vec<i16>,
}

impl Joystick {
    fn new(axes: usize, buttons: usize, povs: usize, caps: &JoystickCaps) -> Joystick {
        Joystick {
            real_axes: axes,
            real_buttons: buttons,
            real_povs: povs,
            axes: vec![0.0; axes.min(caps.axes)],
            buttons: vec![false; buttons.min(caps.buttons)],
            povs: vec![-1; povs.min(caps.povs)],
        }
    }

    #[inline(always)]
    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    #[inline(always)]
    pub fn num_buttons(&self) -> usize {
        self.buttons.len()
    }

    #[inline(always)]
    pub fn num_povs(&self) -> usize {
        self.povs.len()
    }
}

/// Ordered sequence of the attached joysticks, identified by index.
/// Protocols read the snapshot out while encoding robot packets; mutation
/// stays with the engine.
pub struct JoystickRegistry {
    sticks: Vec<Joystick>,
}

impl JoystickRegistry {
    pub(crate) const fn new() -> JoystickRegistry {
        JoystickRegistry { sticks: Vec::new() }
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.sticks.len()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&Joystick> {
        self.sticks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Joystick> {
        self.sticks.iter()
    }

    /// Registers a joystick with the given capabilities. Fails if the stick
    /// has no inputs at all or the protocol's joystick limit is reached.
    pub(crate) fn register(
        &mut self,
        axes: usize,
        buttons: usize,
        povs: usize,
        caps: &JoystickCaps,
    ) -> bool {
        if axes == 0 && buttons == 0 && povs == 0 {
            debug!("rejecting joystick with no axes, buttons or POVs");
            return false;
        }

        if self.sticks.len() + 1 > caps.joysticks {
            debug!("rejecting joystick, limit of {} reached", caps.joysticks);
            return false;
        }

        self.sticks.push(Joystick::new(axes, buttons, povs, caps));
        debug!(
            "registered joystick {} ({} axes, {} buttons, {} POVs)",
            self.sticks.len() - 1,
            axes,
            buttons,
            povs
        );
        true
    }

    /// Removes the joystick at `index`. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, index: usize) -> bool {
        if index < self.sticks.len() {
            self.sticks.remove(index);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear(&mut self) {
        self.sticks.clear();
    }

    /// Re-registers every joystick against a new protocol's limits. The
    /// host-reported capabilities survive; live values reset to neutral.
    pub(crate) fn reconfigure(&mut self, caps: &JoystickCaps) {
        let old = std::mem::take(&mut self.sticks);
        for stick in old.into_iter().take(caps.joysticks) {
            self.sticks.push(Joystick::new(
                stick.real_axes,
                stick.real_buttons,
                stick.real_povs,
                caps,
            ));
        }
    }

    /// Updates an axis value. Out-of-range indices and non-finite values are
    /// discarded; in-range values are clamped to `[-1, 1]`.
    pub(crate) fn update_axis(&mut self, stick: usize, axis: usize, value: f32) {
        if !value.is_finite() {
            return;
        }

        if let Some(slot) = self
            .sticks
            .get_mut(stick)
            .and_then(|s| s.axes.get_mut(axis))
        {
            *slot = value.clamp(-1.0, 1.0);
        }
    }

    pub(crate) fn update_button(&mut self, stick: usize, button: usize, pressed: bool) {
        if let Some(slot) = self
            .sticks
            .get_mut(stick)
            .and_then(|s| s.buttons.get_mut(button))
        {
            *slot = pressed;
        }
    }

    pub(crate) fn update_pov(&mut self, stick: usize, pov: usize, angle: i16) {
        if let Some(slot) = self
            .sticks
            .get_mut(stick)
            .and_then(|s| s.povs.get_mut(pov))
        {
            *slot = angle;
        }
    }
}
