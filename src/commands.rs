//! The DPScope command table.
//!
//! One [`CommandSpec`] per device operation, fixed at compile time.

use crate::command::{CommandSpec, Field};

const U8: &[Field] = &[Field::U8];
const U8_U8: &[Field] = &[Field::U8, Field::U8];
const U16: &[Field] = &[Field::U16];
const U16_U16: &[Field] = &[Field::U16, Field::U16];
const PING_REPLY: &[Field] = &[Field::Bytes(7)];

// No arguments
pub const READ_ADC: CommandSpec = CommandSpec::new("read_adc", 3).returns(U8_U8);
pub const PING: CommandSpec = CommandSpec::new("ping", 4).no_ack().returns(PING_REPLY);
pub const REVISION: CommandSpec = CommandSpec::new("revision", 5).no_ack().returns(U8_U8);
pub const ABORT: CommandSpec = CommandSpec::new("abort", 6);
pub const READ_ADC_10: CommandSpec = CommandSpec::new("read_adc_10", 7)
    .returns(U16_U16)
    .post_ack();
pub const MEASURE_OFFSET: CommandSpec = CommandSpec::new("measure_offset", 8)
    .returns(U16_U16)
    .post_ack();

// One byte
pub const TRIG_SOURCE: CommandSpec = CommandSpec::new("trig_source", 21).args(U8);
pub const TRIG_POL: CommandSpec = CommandSpec::new("trig_pol", 22).args(U8);
/// Only the opcode is used; the exchange itself is special-cased by
/// [`CommandChannel::readback`](crate::CommandChannel::readback).
pub const READ_BACK: CommandSpec = CommandSpec::new("read_back", 23).args(U8);
pub const SAMPLE_RATE: CommandSpec = CommandSpec::new("sample_rate", 24).args(U8);
pub const NOISE_REJECT: CommandSpec = CommandSpec::new("noise_reject", 25).args(U8);
pub const ARM: CommandSpec = CommandSpec::new("arm", 26).args(U8);
pub const ADCON_FROM: CommandSpec = CommandSpec::new("adcon_from", 27).args(U8);
pub const CAL_MODE: CommandSpec = CommandSpec::new("cal_mode", 28).args(U8);
pub const PRETRIGGER_MODE: CommandSpec = CommandSpec::new("pretrigger_mode", 29).args(U8);
pub const TIMER_PRESCALE: CommandSpec = CommandSpec::new("timer_prescale", 30).args(U8);
pub const POST_TRIG_CNT: CommandSpec = CommandSpec::new("post_trig_cnt", 31).args(U8);
pub const SERIAL_TX: CommandSpec = CommandSpec::new("serial_tx", 32).args(U8);
pub const STATUS_LED: CommandSpec = CommandSpec::new("status_led", 33).args(U8);

// Two bytes
pub const TRIG_LEVEL: CommandSpec = CommandSpec::new("trig_level", 41).args(U16);
pub const PRE_GAIN: CommandSpec = CommandSpec::new("pre_gain", 42).args(U8_U8);
pub const GAIN: CommandSpec = CommandSpec::new("gain", 43).args(U8_U8);
pub const SET_DAC: CommandSpec = CommandSpec::new("set_dac", 44).args(U8_U8);
pub const ARM_FFT: CommandSpec = CommandSpec::new("arm_fft", 45).args(U8_U8);
pub const SET_DELAY: CommandSpec = CommandSpec::new("set_delay", 49).args(U16);
pub const TIMER_PERIOD: CommandSpec = CommandSpec::new("timer_period", 51).args(U16);

pub const ALL_COMMANDS: &[CommandSpec] = &[
    READ_ADC,
    PING,
    REVISION,
    ABORT,
    READ_ADC_10,
    MEASURE_OFFSET,
    TRIG_SOURCE,
    TRIG_POL,
    READ_BACK,
    SAMPLE_RATE,
    NOISE_REJECT,
    ARM,
    ADCON_FROM,
    CAL_MODE,
    PRETRIGGER_MODE,
    TIMER_PRESCALE,
    POST_TRIG_CNT,
    SERIAL_TX,
    STATUS_LED,
    TRIG_LEVEL,
    PRE_GAIN,
    GAIN,
    SET_DAC,
    ARM_FFT,
    SET_DELAY,
    TIMER_PERIOD,
];
