#![no_main]
#![no_std]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering, compiler_fence};

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_mspm0::adc::{self, Adc};
use embassy_mspm0::gpio::{Level, Output};
use embassy_mspm0::interrupt;
use embassy_mspm0::interrupt::{InterruptExt, Priority};
use embassy_mspm0::pac::sysctl::vals::ResetcmdKey;
use embassy_mspm0::uart::{self, Uart, UartTx};
use embassy_mspm0::wwdt::{self, Watchdog};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Delay, Duration, Instant, Ticker, Timer, with_timeout};

use defmt::{error, info, warn};

use defmt_rtt as _;

mod pulse_adc;
mod serial;

use pulse_monitor::display;
use pulse_monitor::indicator::BeatFade;
use pulse_monitor::telemetry;
use pulse_monitor::temperature::{Temperature, TemperatureSensor};
use pulse_monitor::uplink::{Esp8266, UplinkConfig, UplinkReading};
use pulse_monitor::{Detector, DetectorConfig, Sampler, SharedMonitor};

use crate::pulse_adc::SensorAdc;
use crate::serial::AsyncSerial;

const TICK_MS: u64 = DetectorConfig::DEFAULT.tick_ms as u64;
/// Temperature is slow; convert it once a second from the sampler.
const TEMPERATURE_EVERY_TICKS: u32 = 500;
/// Outer loop period: telemetry, LED fade and watchdog.
const LOOP_MS: u64 = 20;
/// Refresh the vitals frame every this many loop passes.
const DISPLAY_EVERY_LOOPS: u32 = 50;
/// ThingSpeak rejects updates closer than 15 s.
const UPLOAD_PERIOD_SECS: u64 = 15;
const UPLOAD_TIMEOUT_SECS: u64 = 10;

const TELEMETRY_BAUD: u32 = 115_200;
const MODEM_BAUD: u32 = 9_600;

/// The 3.3 V rail feeds the LM35 reference; readings are already in 10-bit scale.
const LM35: TemperatureSensor = TemperatureSensor { vref_mv: 3300, full_scale: 1024 };

/// Credentials are baked in at build time from the environment.
const UPLINK: UplinkConfig<'static> = UplinkConfig::new(
    build_env(option_env!("PULSE_WIFI_SSID")),
    build_env(option_env!("PULSE_WIFI_PASSWORD")),
    build_env(option_env!("PULSE_API_KEY")),
);

const fn build_env(value: Option<&'static str>) -> &'static str {
    match value {
        Some(v) => v,
        None => "",
    }
}

static MONITOR: SharedMonitor<CriticalSectionRawMutex> = SharedMonitor::new(Detector::new());

/// Latest temperature in tenths of °C, written by the sampler.
static LAST_TEMPERATURE: AtomicI32 = AtomicI32::new(0);

static SAMPLER_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn I2C0() {
    unsafe { SAMPLER_EXECUTOR.on_interrupt() }
}

fn uart_ll_write(buffer: &[u8]) {
    for &b in buffer {
        while !embassy_mspm0::pac::UART2.stat().read().txfe() {}
        compiler_fence(Ordering::Release);
        embassy_mspm0::pac::UART2.txdata().write(|w| {
            w.set_data(b);
        });
    }
}

fn system_reset() {
    embassy_mspm0::pac::SYSCTL.resetlevel().write(|w| {
        w.set_level(embassy_mspm0::pac::sysctl::vals::ResetlevelLevel::POR);
    });
    embassy_mspm0::pac::SYSCTL.resetcmd().write(|w| {
        w.set_key(ResetcmdKey::KEY);
        w.set_go(true);
    });
}

// Dumps the panic to the telemetry UART, then resets.
// The detector state is volatile anyway, so a reset costs one warm-up.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    static PANICKED: AtomicBool = AtomicBool::new(false);

    cortex_m::interrupt::disable();

    if !PANICKED.load(Ordering::Relaxed) {
        PANICKED.store(true, Ordering::Relaxed);

        let msg = info.message().as_str().unwrap_or("No panic message!");

        uart_ll_write(b"******Panicked!*********\r\n");
        uart_ll_write(b"Message: ");
        uart_ll_write(msg.as_bytes());
        uart_ll_write(b"\r\nLocation: ");
        match info.location() {
            Some(l) => uart_ll_write(l.file().as_bytes()),
            None => uart_ll_write(b"unknown"),
        }
        uart_ll_write(b"\r\n");
    }

    loop {
        system_reset();
    }
}

#[cortex_m_rt::exception]
unsafe fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    panic!("Got a HardFault");
}

/// Feeds the detector every 2 ms from a timer-driven interrupt executor.
///
/// `Ticker` schedules from the previous deadline, so a late tick is followed
/// by catch-up ticks and `sample_clock` stays locked to wall time.
#[embassy_executor::task]
async fn sampler(mut adc: SampleDriver, mut beat_led: Output<'static>) {
    let period = Duration::from_millis(TICK_MS);
    let mut ticker = Ticker::every(period);
    let mut deadline = Instant::now() + period;
    let mut until_temperature = 0u32;

    loop {
        ticker.next().await;

        let late = Instant::now().saturating_duration_since(deadline);
        if late > period {
            warn!("sampler late by {} us", late.as_micros());
        }
        deadline += period;

        let out = adc.sample(&MONITOR);
        beat_led.set_level(if out.pulse_active { Level::High } else { Level::Low });

        if until_temperature == 0 {
            until_temperature = TEMPERATURE_EVERY_TICKS;
            let raw = adc.source_mut().read_temperature();
            LAST_TEMPERATURE.store(LM35.convert(raw).deci_celsius(), Ordering::Relaxed);
        }
        until_temperature -= 1;
    }
}

type SampleDriver = Sampler<SensorAdc<'static>>;

#[embassy_executor::task]
async fn uplink(modem: Uart<'static, embassy_mspm0::mode::Blocking>) {
    let mut esp = Esp8266::new(AsyncSerial::new(modem), Delay, UPLINK);

    if let Err(e) = esp.initialize().await {
        error!("modem init failed: {}", defmt::Debug2Format(&e));
    }

    loop {
        Timer::after_secs(UPLOAD_PERIOD_SECS).await;

        let reading = UplinkReading {
            bpm: MONITOR.snapshot().bpm,
            temperature: Temperature::from_deci_celsius(LAST_TEMPERATURE.load(Ordering::Relaxed)),
        };

        match with_timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS), esp.push(&reading)).await {
            Ok(Ok(())) => info!("uploaded {}", reading),
            Ok(Err(e)) => warn!("upload failed: {}", defmt::Debug2Format(&e)),
            Err(_) => warn!("upload timed out"),
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let periph = embassy_mspm0::init(Default::default());
    let beat_led = Output::new(periph.PA10, Level::Low);
    let mut fade_led = Output::new(periph.PA25, Level::Low);

    // Telemetry UART first - the panic handler writes to it.
    let mut config = uart::Config::default();
    config.baudrate = TELEMETRY_BAUD;
    let telemetry_tx = UartTx::new_blocking(periph.UART2, periph.PA21, config).unwrap();
    let mut telemetry_out = AsyncSerial::new(telemetry_tx);

    let rstcause = (embassy_mspm0::pac::SYSCTL.rstcause().read().0 & 0x0F) as u8;
    info!("reset cause: {:02x}", rstcause);

    let frame = display::splash();
    info!("LCD | {} | {}", frame.top, frame.bottom);

    // Reset on flash ECC and watchdog faults from here on.
    embassy_mspm0::pac::SYSCTL.systemcfg().write(|w| {
        w.set_flasheccrstdis(false);
        w.set_wwdtlp0rstdis(false);
        w.set_wwdtlp1rstdis(false);
    });

    let mut watchdog_cfg = wwdt::Config::default();
    watchdog_cfg.closed_window = wwdt::ClosedWindowPercentage::Zero;
    watchdog_cfg.timeout = wwdt::Timeout::Sec4;
    let mut watchdog = Watchdog::new(periph.WWDT0, watchdog_cfg);
    watchdog.pet();

    let adc = Adc::new_blocking(periph.ADC0, adc::Config::default());
    let sensors = SensorAdc::new(adc, periph.PA27.degrade_adc(), periph.PA26.degrade_adc());

    interrupt::I2C0.set_priority(Priority::P1);
    let sampler_spawner = SAMPLER_EXECUTOR.start(interrupt::I2C0);
    sampler_spawner.spawn(sampler(Sampler::new(sensors), beat_led).unwrap());

    let frame = display::initializing();
    info!("LCD | {} | {}", frame.top, frame.bottom);

    let mut modem_cfg = uart::Config::default();
    modem_cfg.baudrate = MODEM_BAUD;
    match Uart::new_blocking(periph.UART1, periph.PA9, periph.PA8, modem_cfg) {
        Ok(modem) => spawner.spawn(uplink(modem).unwrap()),
        Err(e) => error!("modem uart config error: {}", defmt::Debug2Format(&e)),
    }

    let mut fade = BeatFade::new();
    let mut until_display = 0u32;

    loop {
        let snapshot = MONITOR.snapshot();
        let beat = MONITOR.take_beat();
        if beat.is_some() {
            fade.trigger();
        }

        if let Err(e) = telemetry::publish(&mut telemetry_out, &snapshot, beat).await {
            warn!("telemetry write failed: {}", defmt::Debug2Format(&e));
        }


        if until_display == 0 {
            until_display = DISPLAY_EVERY_LOOPS;
            let temperature = Temperature::from_deci_celsius(LAST_TEMPERATURE.load(Ordering::Relaxed));
            let frame = display::vitals(snapshot.bpm, temperature);
            info!("LCD | {} | {}", frame.top, frame.bottom);
        }
        until_display -= 1;

        // The loop runs every 20 ms, well inside the 4 s window.
        watchdog.pet();

        // The loop wait doubles as one software PWM period for the fade LED.
        fade.step();
        let on_ms = if fade.is_lit() { u64::from(fade.on_time_ms(LOOP_MS as u32)) } else { 0 };
        if on_ms > 0 {
            fade_led.set_high();
            Timer::after_millis(on_ms).await;
            fade_led.set_low();
        }
        Timer::after_millis(LOOP_MS - on_ms).await;
    }
}
