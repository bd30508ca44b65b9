//! One acquisition cycle's worth of readings and its CSV rendering.
//!
//! The fixed columns are always present; sensors that are missing contribute
//! their default values. Add-on sensors (GPS, CO2) append their columns only
//! while fitted, which is why the header is derived from the reading itself.

use alloc::string::String;
use core::fmt::Write;

use crate::clock::Timestamp;
use crate::config::Identity;
use crate::sensors::{
    AirQuality, AirTemperature, BatteryVoltage, GpsFix, NearInfraredSpectrum, Range,
    SPECTRAL_CHANNELS, SensorReadings, SurfaceTemperature, VisibleSpectrum, Weather,
};

const SYSTEM_HEADER: &str = "device_type, software_version, UID, batch_number, weekday, \
                             timestamp_iso8601, decimal_hour";

/// Written in the weekday column when the clock is unset.
const NO_WEEKDAY: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: Timestamp,
    pub surface: SurfaceTemperature,
    pub air: AirTemperature,
    pub weather: Weather,
    pub range: Range,
    pub visible: VisibleSpectrum,
    pub nir: NearInfraredSpectrum,
    pub gps: Option<GpsFix>,
    pub air_quality: Option<AirQuality>,
    pub battery: BatteryVoltage,
}

impl Reading {
    /// A reading with every sensor at its absent default.
    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            surface: SurfaceTemperature::default(),
            air: AirTemperature::default(),
            weather: Weather::default(),
            range: Range::default(),
            visible: VisibleSpectrum::default(),
            nir: NearInfraredSpectrum::default(),
            gps: None,
            air_quality: None,
            battery: BatteryVoltage::default(),
        }
    }

    /// Visible channels followed by near-infrared channels.
    pub fn spectral_channels(&self) -> [i32; SPECTRAL_CHANNELS] {
        let mut channels = [0; SPECTRAL_CHANNELS];
        channels[..6].copy_from_slice(&self.visible.channels);
        channels[6..].copy_from_slice(&self.nir.channels);
        channels
    }

    /// Column names for a data file holding this reading (no line terminator).
    pub fn header(&self) -> String {
        let mut out = String::from(SYSTEM_HEADER);
        out.push_str(", ");
        SurfaceTemperature::write_header(&mut out);
        out.push_str(", ");
        AirTemperature::write_header(&mut out);
        out.push_str(", ");
        Weather::write_header(&mut out);
        out.push_str(", ");
        VisibleSpectrum::write_header(&mut out);
        out.push_str(", ");
        NearInfraredSpectrum::write_header(&mut out);
        out.push_str(", ");
        Range::write_header(&mut out);
        // Older files have no space here; keep it so their headers still match.
        out.push(',');
        BatteryVoltage::write_header(&mut out);

        if self.gps.is_some() {
            out.push_str(", ");
            GpsFix::write_header(&mut out);
        }
        if self.air_quality.is_some() {
            out.push_str(", ");
            AirQuality::write_header(&mut out);
        }
        out
    }

    /// One data row, newline terminated.
    pub fn to_row(&self, identity: &Identity, batch: u32) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "{}, {}, {}, {}, {}, {}, {}",
            identity.device_type,
            identity.software_version,
            identity.uid,
            batch,
            self.timestamp.weekday_name().unwrap_or(NO_WEEKDAY),
            self.timestamp.iso8601(),
            self.timestamp.decimal_hour()
        );

        out.push_str(", ");
        self.surface.write_log(&mut out);
        out.push_str(", ");
        self.air.write_log(&mut out);
        out.push_str(", ");
        self.weather.write_log(&mut out);
        out.push_str(", ");
        self.visible.write_log(&mut out);
        out.push_str(", ");
        self.nir.write_log(&mut out);
        out.push_str(", ");
        self.range.write_log(&mut out);
        out.push_str(", ");
        self.battery.write_log(&mut out);

        if let Some(gps) = &self.gps {
            out.push_str(", ");
            gps.write_log(&mut out);
        }
        if let Some(air_quality) = &self.air_quality {
            out.push_str(", ");
            air_quality.write_log(&mut out);
        }
        out.push('\n');
        out
    }

    /// Labelled copy of the record for the serial console.
    pub fn mirror_line(&self, identity: &Identity, batch: u32) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "mirror_data, device_type, {}, software_version, {}, UID, {}, batch, {}, \
             timestamp, {}, decimal_hour, {:.4}",
            identity.device_type,
            identity.software_version,
            identity.uid,
            batch,
            self.timestamp.iso8601(),
            self.timestamp.decimal_hour()
        );

        for (nm, value) in crate::sensors::VISIBLE_BANDS_NM
            .iter()
            .chain(crate::sensors::NIR_BANDS_NM.iter())
            .zip(self.spectral_channels())
        {
            let _ = write!(out, ", irradiance_{}nm, {}", nm, value);
        }

        let _ = write!(
            out,
            ", surface_temperature_C, {}, air_temperature_C, {}, relative_humidity_percent, {}, \
             barometric_pressure_hPa, {}, range_m, {}, battery_voltage, {:.2}",
            self.surface.celsius,
            self.air.celsius,
            self.weather.relative_humidity_percent,
            self.weather.pressure_hpa,
            self.range.meters,
            self.battery.volts
        );

        if let Some(gps) = &self.gps {
            let _ = write!(
                out,
                ", gps_fix, {}, latitude, {:.6}, longitude, {:.6}",
                u8::from(gps.has_fix),
                gps.latitude_deg,
                gps.longitude_deg
            );
        }
        if let Some(air_quality) = &self.air_quality {
            let _ = write!(out, ", co2_ppm, {:.1}", air_quality.co2_ppm);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: Timestamp = Timestamp {
        year: 2025,
        month: 6,
        day: 1,
        hour: 12,
        minute: 30,
        second: 0,
        weekday: 0,
    };

    fn sample() -> Reading {
        Reading {
            surface: SurfaceTemperature { celsius: 21.5 },
            air: AirTemperature { celsius: 19.25 },
            weather: Weather {
                relative_humidity_percent: 45.5,
                pressure_hpa: 1013.25,
                altitude_m: 12.5,
            },
            range: Range { meters: 1.25 },
            visible: VisibleSpectrum {
                channels: [100, 200, 300, 400, 500, 600],
            },
            nir: NearInfraredSpectrum {
                channels: [700, 800, 900, 1000, 1100, 1200],
            },
            battery: BatteryVoltage { volts: 3.987 },
            ..Reading::empty(NOON)
        }
    }

    #[test]
    fn test_fixed_header_layout() {
        let header = sample().header();
        assert!(header.starts_with(
            "device_type, software_version, UID, batch_number, weekday, timestamp_iso8601, \
             decimal_hour, surface_temperature_C, surface_temperature_uncertainty_C, \
             air_temperature_C, air_temperature_uncertainty_C, relative_humidity_percent"
        ));
        assert!(header.contains(
            "altitude_uncertainty_m, irradiance_450nm_blue_wavelength_nm, \
             irradiance_450nm_blue_wavelength_uncertainty_nm"
        ));
        assert!(header.ends_with(
            "irradiance_860nm_near_infrared_irradiance_uncertainty_uW_per_cm_squared, \
             range_m, range_uncertainty_m,battery_voltage"
        ));
    }

    #[test]
    fn test_header_and_row_have_the_same_width() {
        let identity = Identity::new(1234);
        let mut reading = sample();
        for with_add_ons in [false, true] {
            if with_add_ons {
                reading.gps = Some(GpsFix::default());
                reading.air_quality = Some(AirQuality { co2_ppm: 412.0 });
            }
            let header_columns = reading.header().split(',').count();
            let row = reading.to_row(&identity, 3);
            assert_eq!(row.trim_end().split(',').count(), header_columns);
        }
    }

    #[test]
    fn test_add_ons_extend_header() {
        let mut reading = sample();
        reading.air_quality = Some(AirQuality { co2_ppm: 400.0 });
        assert!(
            reading
                .header()
                .ends_with("battery_voltage, co2_ambient_ppm, co2_uncertainty_ppm")
        );
        assert!(reading.to_row(&Identity::new(1), 0).ends_with("3.99, 400.0, 70.0\n"));
    }

    #[test]
    fn test_row_values() {
        let row = sample().to_row(&Identity::new(1234), 7);
        assert!(row.starts_with(&alloc::format!(
            "STELLA-1.1, {}, 1234, 7, Sunday, 20250601T123000Z, 12.5, 21.5, 1.0, 19.25, 0.3, \
             45.5, 1.8, 1013.25, 1, 12.5, 100, 450, 5, 100, 12, 500, 5, 200, 24",
            crate::config::SOFTWARE_VERSION
        )));
        assert!(row.ends_with("1.25, 0.001, 3.99\n"));
    }

    #[test]
    fn test_unset_clock_row() {
        let row = Reading::empty(Timestamp::UNSET).to_row(&Identity::new(1), 0);
        assert!(row.contains(", 0, -, 20200101T000000Z, 0, -273, 1.0, -273, 0.3, 0, 1.8, 1, 1, -500, 100"));
    }

    #[test]
    fn test_mirror_line() {
        let line = sample().mirror_line(&Identity::new(1234), 2);
        assert!(line.starts_with("mirror_data, device_type, STELLA-1.1"));
        assert!(line.contains("irradiance_860nm, 1200"));
        assert!(!line.contains("gps_fix"));
    }
}
