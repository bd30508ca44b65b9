//! Typed readings for every sensor role the instrument knows about.
//!
//! Each type's [`Default`] is the value recorded when the sensor is absent or
//! its read fails, so a data row always has a value in every column.

use alloc::string::String;
use core::fmt::Write;

use super::SensorReadings;

pub const VISIBLE_BANDS_NM: [u16; 6] = [450, 500, 550, 570, 600, 650];
pub const VISIBLE_BAND_COLORS: [&str; 6] = ["blue", "cyan", "green", "yellow", "orange", "red"];

pub const NIR_BANDS_NM: [u16; 6] = [610, 680, 730, 760, 810, 860];
pub const NIR_BAND_COLORS: [&str; 6] = [
    "orange",
    "near_infrared",
    "near_infrared",
    "near_infrared",
    "near_infrared",
    "near_infrared",
];

/// Visible followed by near-infrared.
pub const SPECTRAL_CHANNELS: usize = 12;

/// Calibrated spectral counts are clipped to this before recording.
pub const MAX_SPECTRAL_VALUE: i32 = 99_999;

/// Uncertainty columns are fixed per sensor model.
const SURFACE_TEMPERATURE_UNCERTAINTY_C: &str = "1.0";
const AIR_TEMPERATURE_UNCERTAINTY_C: &str = "0.3";
const RELATIVE_HUMIDITY_UNCERTAINTY: &str = "1.8";
const PRESSURE_UNCERTAINTY_HPA: &str = "1";
const ALTITUDE_UNCERTAINTY_M: &str = "100";
const RANGE_UNCERTAINTY_M: &str = "0.001";
const WAVELENGTH_UNCERTAINTY_NM: &str = "5";

/// Irradiance uncertainty is 12% of the reading.
const IRRADIANCE_UNCERTAINTY_PERCENT: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceTemperature {
    pub celsius: f32,
}

impl Default for SurfaceTemperature {
    fn default() -> Self {
        Self { celsius: -273.0 }
    }
}

impl SensorReadings for SurfaceTemperature {
    fn write_header(out: &mut String) {
        out.push_str("surface_temperature_C, surface_temperature_uncertainty_C");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(out, "{}, {}", self.celsius, SURFACE_TEMPERATURE_UNCERTAINTY_C);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirTemperature {
    pub celsius: f32,
}

impl Default for AirTemperature {
    fn default() -> Self {
        Self { celsius: -273.0 }
    }
}

impl SensorReadings for AirTemperature {
    fn write_header(out: &mut String) {
        out.push_str("air_temperature_C, air_temperature_uncertainty_C");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(out, "{}, {}", self.celsius, AIR_TEMPERATURE_UNCERTAINTY_C);
    }
}

/// Humidity, pressure and the barometric altitude derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weather {
    pub relative_humidity_percent: f32,
    pub pressure_hpa: f32,
    pub altitude_m: f32,
}

impl Default for Weather {
    fn default() -> Self {
        Self {
            relative_humidity_percent: 0.0,
            pressure_hpa: 1.0,
            altitude_m: -500.0,
        }
    }
}

impl SensorReadings for Weather {
    fn write_header(out: &mut String) {
        out.push_str(
            "relative_humidity_percent, relative_humidity_uncertainty_percent, \
             barometric_pressure_hPa, barometric_pressure_uncertainty_hPa, \
             altitude_uncalibrated_m, altitude_uncertainty_m",
        );
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(
            out,
            "{}, {}, {}, {}, {}, {}",
            self.relative_humidity_percent,
            RELATIVE_HUMIDITY_UNCERTAINTY,
            self.pressure_hpa,
            PRESSURE_UNCERTAINTY_HPA,
            self.altitude_m,
            ALTITUDE_UNCERTAINTY_M
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Range {
    pub meters: f32,
}

impl SensorReadings for Range {
    fn write_header(out: &mut String) {
        out.push_str("range_m, range_uncertainty_m");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(out, "{}, {}", self.meters, RANGE_UNCERTAINTY_M);
    }
}

/// Clip a calibrated spectral value into the recorded integer range.
pub fn spectral_count(calibrated: f32) -> i32 {
    if !calibrated.is_finite() {
        return 0;
    }
    (libm::roundf(calibrated * 10.0) / 10.0).clamp(i32::MIN as f32, MAX_SPECTRAL_VALUE as f32) as i32
}

fn write_bands_header(out: &mut String, bands: &[u16; 6], colors: &[&str; 6]) {
    for (i, (nm, color)) in bands.iter().zip(colors).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(
            out,
            "irradiance_{nm}nm_{color}_wavelength_nm, \
             irradiance_{nm}nm_{color}_wavelength_uncertainty_nm, \
             irradiance_{nm}nm_{color}_irradiance_uW_per_cm_squared, \
             irradiance_{nm}nm_{color}_irradiance_uncertainty_uW_per_cm_squared"
        );
    }
}

fn write_bands(out: &mut String, bands: &[u16; 6], channels: &[i32; 6]) {
    for (i, (nm, value)) in bands.iter().zip(channels).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(
            out,
            "{}, {}, {}, {}",
            nm,
            WAVELENGTH_UNCERTAINTY_NM,
            value,
            *value as f32 * IRRADIANCE_UNCERTAINTY_PERCENT / 100.0
        );
    }
}

/// Six visible bands, 450 nm to 650 nm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibleSpectrum {
    pub channels: [i32; 6],
}

impl VisibleSpectrum {
    pub fn from_calibrated(values: [f32; 6]) -> Self {
        Self {
            channels: values.map(spectral_count),
        }
    }
}

impl SensorReadings for VisibleSpectrum {
    fn write_header(out: &mut String) {
        write_bands_header(out, &VISIBLE_BANDS_NM, &VISIBLE_BAND_COLORS);
    }

    fn write_log(&self, out: &mut String) {
        write_bands(out, &VISIBLE_BANDS_NM, &self.channels);
    }
}

/// Six near-infrared bands, 610 nm to 860 nm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NearInfraredSpectrum {
    pub channels: [i32; 6],
}

impl NearInfraredSpectrum {
    pub fn from_calibrated(values: [f32; 6]) -> Self {
        Self {
            channels: values.map(spectral_count),
        }
    }
}

impl SensorReadings for NearInfraredSpectrum {
    fn write_header(out: &mut String) {
        write_bands_header(out, &NIR_BANDS_NM, &NIR_BAND_COLORS);
    }

    fn write_log(&self, out: &mut String) {
        write_bands(out, &NIR_BANDS_NM, &self.channels);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryVoltage {
    pub volts: f32,
}

impl SensorReadings for BatteryVoltage {
    fn write_header(out: &mut String) {
        out.push_str("battery_voltage");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(out, "{:.2}", self.volts);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsFix {
    pub has_fix: bool,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f32,
}

impl SensorReadings for GpsFix {
    fn write_header(out: &mut String) {
        out.push_str("gps_fix, gps_latitude_degrees, gps_longitude_degrees, gps_altitude_m");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(
            out,
            "{}, {:.6}, {:.6}, {}",
            u8::from(self.has_fix),
            self.latitude_deg,
            self.longitude_deg,
            self.altitude_m
        );
    }
}

/// Ambient CO2 from an air-quality add-on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AirQuality {
    pub co2_ppm: f32,
}

impl AirQuality {
    /// 50 ppm plus 5% of the reading.
    pub fn co2_uncertainty_ppm(&self) -> f32 {
        50.0 + 0.05 * self.co2_ppm
    }
}

impl SensorReadings for AirQuality {
    fn write_header(out: &mut String) {
        out.push_str("co2_ambient_ppm, co2_uncertainty_ppm");
    }

    fn write_log(&self, out: &mut String) {
        let _ = write!(out, "{:.1}, {:.1}", self.co2_ppm, self.co2_uncertainty_ppm());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectral_count_is_capped() {
        assert_eq!(spectral_count(123_456.7), MAX_SPECTRAL_VALUE);
        assert_eq!(spectral_count(1234.44), 1234);
        assert_eq!(spectral_count(f32::NAN), 0);
    }

    #[test]
    fn test_band_header_naming() {
        let mut out = String::new();
        NearInfraredSpectrum::write_header(&mut out);
        assert!(out.starts_with(
            "irradiance_610nm_orange_wavelength_nm, irradiance_610nm_orange_wavelength_uncertainty_nm"
        ));
        assert!(out.ends_with("irradiance_860nm_near_infrared_irradiance_uncertainty_uW_per_cm_squared"));
        assert_eq!(out.split(", ").count(), 24);
    }

    #[test]
    fn test_band_values_carry_uncertainty() {
        let mut out = String::new();
        VisibleSpectrum {
            channels: [100, 0, 0, 0, 0, 50],
        }
        .write_log(&mut out);
        assert!(out.starts_with("450, 5, 100, 12, "));
        assert!(out.ends_with("650, 5, 50, 6"));
    }

    #[test]
    fn test_absent_defaults() {
        let mut out = String::new();
        AirTemperature::default().write_log(&mut out);
        assert_eq!(out, "-273, 0.3");

        out.clear();
        Weather::default().write_log(&mut out);
        assert_eq!(out, "0, 1.8, 1, 1, -500, 100");
    }

    #[test]
    fn test_co2_uncertainty() {
        let mut out = String::new();
        AirQuality { co2_ppm: 400.0 }.write_log(&mut out);
        assert_eq!(out, "400.0, 70.0");
    }
}
