//! MBNet node is [Embassy](https://embassy.dev)-based firmware that puts a [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html) on an MBNet bus, the CAN-based protocol the boards of
//! a modular MIDI instrument use to talk to each other.
//!
//! The node answers memory and ping requests from a small memory window. If its address makes it a master, it also
//! scans the bus for slaves in the background. The red LED shows bus health (dark when healthy, blinking in panic, solid
//! once the bus is permanently off) and the user button starts discovery over, or brings a dead bus back up.
//!
//! The CAN controller is on PB8 (RX) and PB9 (TX), which need an external transceiver between them and the bus.

#![no_std]
#![no_main]

mod can_port;
mod configuration;
mod node;

use crate::{can_port::CanPort, node::NodeMemory};
use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    Config, bind_interrupts,
    can::{self, Can},
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    peripherals::CAN1,
    time::Hertz,
};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex,
    watch::{Receiver, Sender, Watch},
};
use embassy_time::{Ticker, Timer};
use mbnet::{Engine, Error, HealthState};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        CAN1_RX0 => can::Rx0InterruptHandler<CAN1>;
        CAN1_RX1 => can::Rx1InterruptHandler<CAN1>;
        CAN1_SCE => can::SceInterruptHandler<CAN1>;
        CAN1_TX => can::TxInterruptHandler<CAN1>;
    }
);

type EngineAsyncMutex = mutex::Mutex<CriticalSectionRawMutex, Engine<CanPort>>;

const HEALTH_RECEIVER_CNT: usize = 1;
type HealthSync = Watch<CriticalSectionRawMutex, HealthState, HEALTH_RECEIVER_CNT>;
type HealthSender<'a> = Sender<'a, CriticalSectionRawMutex, HealthState, HEALTH_RECEIVER_CNT>;
type HealthReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, HealthState, HEALTH_RECEIVER_CNT>;

/// Publishes bus health to the LED.
static HEALTH_SYNC: HealthSync = Watch::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing MBNet node");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            divq: None,
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        // bxCAN is clocked from APB1: 216Mhz / 4 = 54Mhz, which divides evenly into 1Mbit/s
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
    }
    let p = embassy_stm32::init(config);

    // per UM1974, PB8/PB9 are routed to the morpho header; an external transceiver sits between them and the bus
    let mut can = Can::new(p.CAN1, p.PB8, p.PB9, Irqs);
    can.modify_config().set_bitrate(configuration::BITRATE);
    can.enable().await;

    let mut engine = unwrap!(Engine::new(CanPort::new(can), configuration::engine_config()));
    let address = unwrap!(engine.configure(configuration::NODE_ADDRESS));
    info!("Node {} is a {}", address, address.role());

    static ENGINE: StaticCell<EngineAsyncMutex> = StaticCell::new();
    let engine = ENGINE.init(mutex::Mutex::new(engine));

    let health_sender = HEALTH_SYNC.sender();
    health_sender.send(HealthState::Healthy);
    let memory = NodeMemory::new(configuration::NODE_INFO);
    unwrap!(spawner.spawn(mbnet_task(engine, memory, health_sender)));

    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    let health_receiver = unwrap!(HEALTH_SYNC.receiver());
    unwrap!(spawner.spawn(health_display_task(red_led, health_receiver)));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(reconnect_input_task(button, engine)));

    unwrap!(spawner.spawn(status_task(engine)));
}

/// Runs the engine's periodic handler: answers requests and, on a master, advances discovery.
#[embassy_executor::task]
async fn mbnet_task(
    engine: &'static EngineAsyncMutex,
    mut memory: NodeMemory,
    health: HealthSender<'static>,
) -> ! {
    let mut ticker = Ticker::every(configuration::TICK_PERIOD);
    // only changes are logged, a dead bus would otherwise fail every tick
    let mut last_error: Option<Error> = None;
    loop {
        ticker.next().await;
        let mut engine = engine.lock().await;

        let result = engine.tick(&mut memory);
        if let Err(err) = result {
            if last_error != Some(err) {
                warn!("MBNet tick failed: {}", err);
            }
        }
        last_error = result.err();

        let state = engine.health();
        health.send_if_modified(|current| {
            if *current == Some(state) {
                return false;
            }
            *current = Some(state);
            true
        });
    }
}

/// Shows bus health on the LED: dark when healthy, blinking in panic and solid when permanently off.
#[embassy_executor::task]
async fn health_display_task(mut led: Output<'static>, mut health: HealthReceiver<'static>) -> ! {
    let mut state = health.get().await;
    loop {
        match state {
            HealthState::Healthy => {
                led.set_low();
                state = health.changed().await;
            }
            HealthState::PermanentOff => {
                led.set_high();
                state = health.changed().await;
            }
            HealthState::Panic => {
                led.toggle();
                if let Either::First(new_state) =
                    select(health.changed(), Timer::after(configuration::PANIC_BLINK_PERIOD)).await
                {
                    state = new_state;
                }
            }
        }
    }
}

/// Handles button presses: restarts discovery, or reinitializes the bus if it is permanently off.
#[embassy_executor::task]
async fn reconnect_input_task(mut button: ExtiInput<'static>, engine: &'static EngineAsyncMutex) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        let mut engine = engine.lock().await;
        if engine.health() == HealthState::PermanentOff {
            match engine.init() {
                Ok(()) => info!("Bus reinitialized"),
                Err(err) => error!("Bus reinitialization failed: {}", err),
            }
        } else {
            engine.reconnect();
        }
    }
}

/// Logs the node's status report.
#[embassy_executor::task]
async fn status_task(engine: &'static EngineAsyncMutex) -> ! {
    let mut ticker = Ticker::every(configuration::STATUS_PERIOD);
    loop {
        ticker.next().await;
        let engine = engine.lock().await;
        info!("{}", Display2Format(&engine.status()));
    }
}
