//! ---
//! simtap_section: "02-daemon"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Synthetic flight profile feeding the loopback host."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::f64::consts::PI;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use simtap_core::LoopbackHost;

const CRUISE_ALTITUDE_FT: f64 = 8500.0;
const CLIMB_RATE_FPS: f64 = 12.5;

/// Simulator variables written by the profile, as the host names them.
pub const DATUMS: [&str; 8] = [
    "PLANE PITCH DEGREES",
    "PLANE BANK DEGREES",
    "AIRSPEED INDICATED",
    "PLANE ALTITUDE",
    "VERTICAL SPEED",
    "PLANE HEADING DEGREES MAGNETIC",
    "GENERAL ENG THROTTLE LEVER POSITION:1",
    "FLAPS HANDLE PERCENT",
];

/// One instant of the synthetic flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightState {
    pub pitch_deg: f64,
    pub bank_deg: f64,
    pub airspeed_kt: f64,
    pub altitude_ft: f64,
    pub vertical_speed_fps: f64,
    pub heading_deg: f64,
    pub throttle_pct: f64,
    pub flaps: f64,
}

impl FlightState {
    fn datums(&self) -> [(&'static str, f64); 8] {
        [
            (DATUMS[0], self.pitch_deg),
            (DATUMS[1], self.bank_deg),
            (DATUMS[2], self.airspeed_kt),
            (DATUMS[3], self.altitude_ft),
            (DATUMS[4], self.vertical_speed_fps),
            (DATUMS[5], self.heading_deg),
            (DATUMS[6], self.throttle_pct),
            (DATUMS[7], self.flaps),
        ]
    }
}

/// Climb out to cruise with a slow banking turn and sensor noise.
#[derive(Debug)]
pub struct FlightProfile {
    rng: StdRng,
    noise: Normal<f64>,
}

impl FlightProfile {
    pub fn new(seed: u64, noise_sigma: f64) -> Result<Self> {
        ensure!(
            noise_sigma.is_finite() && noise_sigma >= 0.0,
            "noise sigma must be finite and non-negative, got {noise_sigma}"
        );
        let noise = Normal::new(0.0, noise_sigma)
            .with_context(|| format!("invalid noise sigma {noise_sigma}"))?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            noise,
        })
    }

    pub fn state_at(&mut self, elapsed: Duration) -> FlightState {
        let t = elapsed.as_secs_f64();
        let climb_secs = CRUISE_ALTITUDE_FT / CLIMB_RATE_FPS;
        let climbing = t < climb_secs;

        let altitude_ft = if climbing {
            CLIMB_RATE_FPS * t
        } else {
            CRUISE_ALTITUDE_FT + 40.0 * (2.0 * PI * 0.01 * t).sin()
        };
        let vertical_speed_fps = if climbing {
            CLIMB_RATE_FPS
        } else {
            40.0 * 2.0 * PI * 0.01 * (2.0 * PI * 0.01 * t).cos()
        };
        let bank_deg = 25.0 * (2.0 * PI * t / 240.0).sin();
        let heading_deg = (270.0 + 360.0 * t / 240.0).rem_euclid(360.0);

        FlightState {
            pitch_deg: if climbing { 7.5 } else { 1.5 } + self.noise_sample(),
            bank_deg: bank_deg + self.noise_sample(),
            airspeed_kt: if climbing { 95.0 } else { 128.0 } + self.noise_sample() * 2.0,
            altitude_ft: altitude_ft + self.noise_sample() * 5.0,
            vertical_speed_fps,
            heading_deg,
            throttle_pct: if climbing { 100.0 } else { 72.0 },
            flaps: if t < 30.0 { 0.1 } else { 0.0 },
        }
    }

    /// Write the state at `elapsed` into the host's simulator variables.
    pub fn feed(&mut self, host: &LoopbackHost, elapsed: Duration) -> FlightState {
        let state = self.state_at(elapsed);
        for (datum, value) in state.datums() {
            host.set_value(datum, value);
        }
        state
    }

    fn noise_sample(&mut self) -> f64 {
        self.noise.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_flight() {
        let mut a = FlightProfile::new(7, 0.2).unwrap();
        let mut b = FlightProfile::new(7, 0.2).unwrap();
        let t = Duration::from_secs(42);
        assert_eq!(a.state_at(t), b.state_at(t));
    }

    #[test]
    fn climbs_then_holds_cruise() {
        let mut profile = FlightProfile::new(1, 0.0).unwrap();
        let early = profile.state_at(Duration::from_secs(60));
        assert!((early.altitude_ft - 750.0).abs() < 1e-9);
        assert_eq!(early.throttle_pct, 100.0);

        let cruise = profile.state_at(Duration::from_secs(3600));
        assert!((cruise.altitude_ft - CRUISE_ALTITUDE_FT).abs() <= 40.0);
        assert!(cruise.heading_deg >= 0.0 && cruise.heading_deg < 360.0);
    }

    #[test]
    fn negative_sigma_is_rejected() {
        let err = FlightProfile::new(1, -1.0).unwrap_err();
        assert!(err.to_string().contains("non-negative"));
        assert!(FlightProfile::new(1, f64::INFINITY).is_err());
        assert!(FlightProfile::new(1, 0.0).is_ok());
    }

    #[test]
    fn feed_writes_every_datum() {
        let host = LoopbackHost::new();
        let mut profile = FlightProfile::new(3, 0.0).unwrap();
        let state = profile.feed(&host, Duration::from_secs(10));
        assert_eq!(host.value("AIRSPEED INDICATED"), state.airspeed_kt);
        assert_eq!(host.value("FLAPS HANDLE PERCENT"), 0.1);
    }
}
