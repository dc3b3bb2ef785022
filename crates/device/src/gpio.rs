//! Raspberry Pi hardware backend (`gpio` feature, requires rppal + board).
//!
//! Relays for lamp/lock/buzzer on plain output pins (active-low boards
//! supported), curtain on a 50 Hz servo PWM, analog gas/light channels on an
//! ADS1115 over I2C, an SHT31 climate sensor on the same bus, a 4x4 matrix
//! keypad, and a DFPlayer Mini on the UART for voice clips. The 2-line
//! display is not wired on the current board revision; rows are logged
//! instead.

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use rppal::i2c::I2c;
use rppal::uart::{Parity, Uart};
use tracing::{error, info, warn};

use crate::config::GpioConfig;
use crate::hal::{ClimateReading, Hardware, VoiceClip};

// ---------------------------------------------------------------------------
// ADS1115 (gas on AIN0, light on AIN1)
// ---------------------------------------------------------------------------

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot), DR=100 (128 SPS),
/// COMP_QUE=11 (comparator off). MUX is OR-ed in per channel.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 2] = [0b100, 0b101]; // AIN0, AIN1

/// Conversion time at 128 SPS is ~7.8 ms. We wait 9 ms for margin.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

const CHANNEL_GAS: usize = 0;
const CHANNEL_LIGHT: usize = 1;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

fn read_adc_channel(i2c: &mut I2c, channel: usize) -> Result<u16> {
    i2c.block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())?;
    thread::sleep(CONVERSION_WAIT);

    let mut buf = [0u8; 2];
    i2c.block_read(REG_CONVERSION, &mut buf)?;
    let raw = i16::from_be_bytes(buf).max(0);
    // ADS1115 single-ended reads span 0..32767; the published analog scale
    // is 12-bit (0..4095), so shift down by 3.
    Ok((raw >> 3) as u16)
}

// ---------------------------------------------------------------------------
// SHT31 temperature/humidity sensor (I2C)
// ---------------------------------------------------------------------------

/// Single-shot measurement, high repeatability, no clock stretching.
const SHT31_CMD_MEASURE: [u8; 2] = [0x24, 0x00];
/// High-repeatability conversion takes up to 15 ms.
const SHT31_MEASURE_WAIT: Duration = Duration::from_millis(16);

/// CRC-8 over each 16-bit word, as used by the SHT3x family:
/// polynomial 0x31, initialisation 0xFF.
fn sht31_crc(data: [u8; 2]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn sht31_temperature(raw: u16) -> f32 {
    -45.0 + 175.0 * f32::from(raw) / 65535.0
}

fn sht31_humidity(raw: u16) -> f32 {
    100.0 * f32::from(raw) / 65535.0
}

/// One single-shot measurement: command, conversion wait, then temp word,
/// CRC, humidity word, CRC.
fn read_sht31(i2c: &mut I2c) -> Result<ClimateReading> {
    i2c.write(&SHT31_CMD_MEASURE)?;
    thread::sleep(SHT31_MEASURE_WAIT);

    let mut buf = [0u8; 6];
    i2c.read(&mut buf)?;
    anyhow::ensure!(
        sht31_crc([buf[0], buf[1]]) == buf[2] && sht31_crc([buf[3], buf[4]]) == buf[5],
        "sht31 crc mismatch"
    );

    Ok(ClimateReading {
        temperature_c: sht31_temperature(u16::from_be_bytes([buf[0], buf[1]])),
        humidity_pct: sht31_humidity(u16::from_be_bytes([buf[3], buf[4]])),
    })
}

// ---------------------------------------------------------------------------
// DFPlayer Mini voice module (UART)
// ---------------------------------------------------------------------------

/// DFPlayer serial frame: 0x7E, ver, len, cmd, no-ack, param hi/lo,
/// checksum hi/lo, 0xEF.
fn dfplayer_frame(cmd: u8, param: u16) -> [u8; 10] {
    let [hi, lo] = param.to_be_bytes();
    let body = [0xFFu8, 0x06, cmd, 0x00, hi, lo];
    let sum = 0u16.wrapping_sub(body.iter().map(|&b| u16::from(b)).sum::<u16>());
    let [chk_hi, chk_lo] = sum.to_be_bytes();
    [0x7E, 0xFF, 0x06, cmd, 0x00, hi, lo, chk_hi, chk_lo, 0xEF]
}

/// Play track N from the SD card root (command 0x03).
const DF_CMD_PLAY_TRACK: u8 = 0x03;
const TRACK_ACCESS_GRANTED: u16 = 1;
const TRACK_ACCESS_DENIED: u16 = 2;

// ---------------------------------------------------------------------------
// Keypad layout
// ---------------------------------------------------------------------------

const KEYPAD_LAYOUT: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Fixed pause before energizing the lamp relay, to soften inrush current
/// on the shared supply.
const LAMP_PRE_ENERGIZE: Duration = Duration::from_millis(50);

/// Servo pulse widths for the curtain end positions at 50 Hz.
const SERVO_PERIOD: Duration = Duration::from_millis(20);
const SERVO_OPEN_PULSE: Duration = Duration::from_micros(2000);
const SERVO_CLOSED_PULSE: Duration = Duration::from_micros(1000);

pub struct GpioHardware {
    lamp: OutputPin,
    lock: OutputPin,
    buzzer: OutputPin,
    servo: OutputPin,
    active_low: bool,

    adc: I2c,
    climate: I2c,
    last_gas: u16,
    last_light: u16,

    rows: Vec<OutputPin>,
    cols: Vec<InputPin>,
    /// Key reported on the previous scan, for press-edge detection.
    held_key: Option<char>,

    voice: Option<Uart>,
}

impl GpioHardware {
    /// Claim all pins and buses. Every output starts in its fail-safe
    /// position (relays off, servo at closed).
    pub fn new(cfg: &GpioConfig) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;

        let mut claim_relay = |pin_num: u8| -> Result<OutputPin> {
            let mut pin = gpio.get(pin_num)?.into_output();
            if cfg.active_low {
                pin.set_high(); // active-low relay OFF
            } else {
                pin.set_low();
            }
            Ok(pin)
        };

        let lamp = claim_relay(cfg.lamp_pin)?;
        let lock = claim_relay(cfg.lock_pin)?;
        let buzzer = claim_relay(cfg.buzzer_pin)?;
        let mut servo = gpio.get(cfg.servo_pin)?.into_output();
        servo.set_pwm(SERVO_PERIOD, SERVO_CLOSED_PULSE)?;

        let mut adc = I2c::new().context("failed to open I2C")?;
        adc.set_slave_address(cfg.adc_addr)?;
        let mut climate = I2c::new().context("failed to open I2C")?;
        climate.set_slave_address(cfg.climate_addr)?;

        let rows = cfg
            .keypad_rows
            .iter()
            .map(|&p| {
                let mut pin = gpio.get(p)?.into_output();
                pin.set_high(); // idle: no row selected
                Ok(pin)
            })
            .collect::<Result<Vec<_>>>()?;
        let cols = cfg
            .keypad_cols
            .iter()
            .map(|&p| Ok(gpio.get(p)?.into_input_pullup()))
            .collect::<Result<Vec<_>>>()?;

        // The voice module is optional hardware; a missing UART downgrades
        // to logged playback instead of failing boot.
        let voice = match Uart::new(9600, Parity::None, 8, 1) {
            Ok(uart) => Some(uart),
            Err(e) => {
                warn!("voice UART unavailable, clips will be logged only: {e}");
                None
            }
        };

        info!(
            lamp = cfg.lamp_pin,
            lock = cfg.lock_pin,
            buzzer = cfg.buzzer_pin,
            servo = cfg.servo_pin,
            adc_addr = format_args!("0x{:02x}", cfg.adc_addr),
            climate_addr = format_args!("0x{:02x}", cfg.climate_addr),
            "gpio backend initialised"
        );

        Ok(Self {
            lamp,
            lock,
            buzzer,
            servo,
            active_low: cfg.active_low,
            adc,
            climate,
            last_gas: 0,
            last_light: 0,
            rows,
            cols,
            held_key: None,
            voice,
        })
    }

    fn drive_relay(pin: &mut OutputPin, active_low: bool, on: bool) {
        if on != active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }

    /// One full matrix scan: drive each row low in turn and sample the
    /// columns. Returns the first pressed key found.
    fn scan_keypad(&mut self) -> Option<char> {
        for (r, row) in self.rows.iter_mut().enumerate() {
            row.set_low();
            // Let the line settle before sampling.
            thread::sleep(Duration::from_micros(50));
            let hit = self
                .cols
                .iter()
                .position(|col| col.read() == Level::Low)
                .map(|c| KEYPAD_LAYOUT[r][c]);
            row.set_high();
            if hit.is_some() {
                return hit;
            }
        }
        None
    }
}

impl Hardware for GpioHardware {
    fn read_climate(&mut self) -> Option<ClimateReading> {
        match read_sht31(&mut self.climate) {
            Ok(reading) => Some(reading),
            Err(e) => {
                error!("climate read failed: {e}");
                None
            }
        }
    }

    fn read_gas_raw(&mut self) -> u16 {
        match read_adc_channel(&mut self.adc, CHANNEL_GAS) {
            Ok(raw) => {
                self.last_gas = raw;
                raw
            }
            Err(e) => {
                error!("gas adc read failed: {e}");
                self.last_gas
            }
        }
    }

    fn read_light_raw(&mut self) -> u16 {
        match read_adc_channel(&mut self.adc, CHANNEL_LIGHT) {
            Ok(raw) => {
                self.last_light = raw;
                raw
            }
            Err(e) => {
                error!("light adc read failed: {e}");
                self.last_light
            }
        }
    }

    fn set_lamp(&mut self, on: bool) {
        if on {
            thread::sleep(LAMP_PRE_ENERGIZE);
        }
        Self::drive_relay(&mut self.lamp, self.active_low, on);
    }

    fn set_lock(&mut self, locked: bool) {
        // The lock solenoid engages (locks) when the relay is off.
        Self::drive_relay(&mut self.lock, self.active_low, !locked);
    }

    fn set_curtain(&mut self, open: bool) {
        let pulse = if open { SERVO_OPEN_PULSE } else { SERVO_CLOSED_PULSE };
        if let Err(e) = self.servo.set_pwm(SERVO_PERIOD, pulse) {
            error!("curtain servo pwm failed: {e}");
        }
    }

    fn set_buzzer(&mut self, on: bool) {
        Self::drive_relay(&mut self.buzzer, self.active_low, on);
    }

    fn play_voice(&mut self, clip: VoiceClip) {
        let track = match clip {
            VoiceClip::AccessGranted => TRACK_ACCESS_GRANTED,
            VoiceClip::AccessDenied => TRACK_ACCESS_DENIED,
        };
        match self.voice.as_mut() {
            Some(uart) => {
                if let Err(e) = uart.write(&dfplayer_frame(DF_CMD_PLAY_TRACK, track)) {
                    error!(?clip, "voice playback failed: {e}");
                }
            }
            None => info!(?clip, "voice clip (no module)"),
        }
    }

    fn poll_key(&mut self) -> Option<char> {
        let current = self.scan_keypad();
        // Report only the press edge, not the whole hold.
        let pressed = match (self.held_key, current) {
            (None, Some(k)) => Some(k),
            _ => None,
        };
        self.held_key = current;
        pressed
    }

    fn show_line(&mut self, row: u8, text: &str) {
        info!(row, text, "display");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
