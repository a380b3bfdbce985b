#![no_std]
#![no_main]

use core::cell::RefCell;

use cortex_m::peripheral::NVIC;
use critical_section::Mutex;
use defmt::{info, warn};
use rp2040_hal::gpio::{FunctionUart, Interrupt as GpioInterrupt};
use rp2040_hal::uart::{DataBits, StopBits, UartConfig};
use rp2040_hal::{
    clocks::{init_clocks_and_plls, Clock},
    entry, pac,
    pac::interrupt,
    sio::Sio,
    uart::UartPeripheral,
    watchdog::Watchdog,
    Timer,
};
use rp_pico::XOSC_CRYSTAL_FREQ;

use stepstage::bsp::config::{ENDSTOP_ACTIVE_HIGH, SYSTEM_CLOCK, UART_BAUD_RATE};
use stepstage::bsp::{
    stage_endstop_irq, stage_uart_irq, StageEndstopsType, StagePinsType, StageSerialType,
};
use stepstage::common::output_port::{OutputPort, StagePins};
use stepstage::common::uart::BufferedSerial;
use stepstage::common::uart_comm::SharedSerial;
use stepstage::stage::endstop::{EndstopSafetyHandler, Endstops};
use stepstage::stage::motion_state::MotionState;
use stepstage::stage::sequencer::Sequencer;
use stepstage::{
    stage_dir, stage_step, stage_sys_rx, stage_sys_tx, stage_toggle, stage_uart, stage_x_en,
    stage_x_end, stage_y_en, stage_y_end, stage_z_en, stage_z_end,
};

/// Everything the endstop interrupt owns outright.
struct SafetyResources {
    endstops: StageEndstopsType,
    delay: Timer,
}

static PORT: OutputPort<StagePinsType> = OutputPort::new();
static MOTION: MotionState = MotionState::new();
static SERIAL: SharedSerial<StageSerialType> = SharedSerial::new();
static SAFETY: Mutex<RefCell<Option<SafetyResources>>> = Mutex::new(RefCell::new(None));

fn endstop_edge() -> GpioInterrupt {
    if ENDSTOP_ACTIVE_HIGH {
        GpioInterrupt::EdgeHigh
    } else {
        GpioInterrupt::EdgeLow
    }
}

#[entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();
    let sio = Sio::new(pac.SIO);
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let clocks = init_clocks_and_plls(
        XOSC_CRYSTAL_FREQ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    if clocks.system_clock.freq() != SYSTEM_CLOCK {
        warn!(
            "[STAGE] system clock is {} Hz, timings assume {} Hz",
            clocks.system_clock.freq().to_Hz(),
            SYSTEM_CLOCK.to_Hz()
        );
    }
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    let pins = rp2040_hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // Outputs first, so the axes are disabled before anything can move.
    let stage_pins = StagePins::new(
        stage_step!(pins).into_push_pull_output().into_dyn_pin(),
        stage_dir!(pins).into_push_pull_output().into_dyn_pin(),
        stage_x_en!(pins).into_push_pull_output().into_dyn_pin(),
        stage_y_en!(pins).into_push_pull_output().into_dyn_pin(),
        stage_z_en!(pins).into_push_pull_output().into_dyn_pin(),
        stage_toggle!(pins).into_push_pull_output().into_dyn_pin(),
    );
    PORT.attach(stage_pins).unwrap();

    let uart_pins = (
        stage_sys_tx!(pins).into_function::<FunctionUart>(),
        stage_sys_rx!(pins).into_function::<FunctionUart>(),
    );
    let mut uart = UartPeripheral::new(stage_uart!(pac), uart_pins, &mut pac.RESETS)
        .enable(
            UartConfig::new(UART_BAUD_RATE, DataBits::Eight, None, StopBits::One),
            clocks.peripheral_clock.freq(),
        )
        .unwrap();
    uart.enable_rx_interrupt();
    SERIAL.attach(BufferedSerial::new(uart));

    let mut x_end = stage_x_end!(pins).into_pull_down_input().into_dyn_pin();
    let mut y_end = stage_y_end!(pins).into_pull_down_input().into_dyn_pin();
    let mut z_end = stage_z_end!(pins).into_pull_down_input().into_dyn_pin();
    for pin in [&mut x_end, &mut y_end, &mut z_end] {
        pin.set_interrupt_enabled(endstop_edge(), true);
    }
    let endstops = Endstops::new(x_end, y_end, z_end, ENDSTOP_ACTIVE_HIGH);
    critical_section::with(|cs| {
        SAFETY.borrow_ref_mut(cs).replace(SafetyResources { endstops, delay: timer });
    });

    unsafe {
        NVIC::unmask(stage_uart_irq());
        NVIC::unmask(stage_endstop_irq());
    }

    info!("[STAGE] ready, {} baud", UART_BAUD_RATE.to_Hz());
    Sequencer::new(&MOTION, &PORT, &SERIAL, timer).run()
}

#[interrupt]
fn IO_IRQ_BANK0() {
    critical_section::with(|cs| {
        let mut safety = SAFETY.borrow_ref_mut(cs);
        let Some(res) = safety.as_mut() else {
            return;
        };
        let mut serial = &SERIAL;
        let report = EndstopSafetyHandler::new(&MOTION, &PORT).handle(
            &mut res.endstops,
            &mut serial,
            &mut res.delay,
        );
        info!("[STAGE] endstop handled: {}", report);

        // Edges latched while backing off belong to this same event.
        let (x, y, z) = res.endstops.pins_mut();
        x.clear_interrupt(endstop_edge());
        y.clear_interrupt(endstop_edge());
        z.clear_interrupt(endstop_edge());
    });
}

#[interrupt]
fn UART0_IRQ() {
    SERIAL.with(|serial| serial.service_rx());
}
