#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{Delay, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_radio::wifi::WifiDevice;
use esp_storage::FlashStorage;
use embedded_storage::ReadStorage;
use log::info;
use static_cell::StaticCell;

use scanlink_core::config::{FIRMWARE_VERSION, Timings};
use scanlink_core::device::{Device, Parts};
use scanlink_firmware::app_state::{
    GlobalDevice, SCAN_EVENTS, SCANNED_LINES, backend_defaults, scan_events_task,
};
use scanlink_firmware::control_server::control_server_task;
use scanlink_firmware::error::FirmwareError;
use scanlink_firmware::http_client::TcpHttpClient;
use scanlink_firmware::platform::EspPlatform;
use scanlink_firmware::scanner::{SCANNER_BAUD, scanner_task};
use scanlink_firmware::wifi::EspWifiLink;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static DEVICE: StaticCell<GlobalDevice> = StaticCell::new();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("scanlink {} starting", FIRMWARE_VERSION);

    let radio = RADIO.init(
        esp_radio::init()
            .map_err(|_| FirmwareError::Radio)
            .expect("Failed to initialize Wi-Fi/BLE controller"),
    );
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .map_err(|_| FirmwareError::Radio)
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::<4>::new()),
        seed,
    );
    spawner.must_spawn(net_task(runner));

    // The last flash sector holds both configuration records.
    let flash = FlashStorage::new(peripherals.FLASH).multicore_auto_park();
    let region_offset = (flash.capacity() as u32).saturating_sub(FlashStorage::SECTOR_SIZE);

    let uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(SCANNER_BAUD),
    )
    .map_err(|_| FirmwareError::Uart)
    .expect("Failed to initialize scanner UART")
    .with_rx(peripherals.GPIO18)
    .with_tx(peripherals.GPIO17)
    .into_async();

    let publisher = SCAN_EVENTS
        .publisher()
        .expect("Failed to create publisher");
    let timings = Timings::default();

    let device = Device::boot(
        Parts {
            flash,
            region_offset,
            link: EspWifiLink::new(wifi_controller, stack),
            delay: Delay,
            http: TcpHttpClient::new(stack),
            platform: EspPlatform::new(),
        },
        publisher,
        timings,
        backend_defaults(),
    )
    .await;
    info!("device {} ready", device.settings().device_id.as_str());
    let device: &'static GlobalDevice = DEVICE.init(AsyncMutex::new(device));

    spawner.must_spawn(scan_events_task());
    spawner.must_spawn(scanner_task(uart));
    spawner.must_spawn(control_server_task(stack, device));

    loop {
        let line = SCANNED_LINES.try_receive().ok();
        let restart = {
            let mut device = device.lock().await;
            device.poll_cycle(line.as_deref()).await;
            device.restart_requested()
        };
        if restart {
            info!("restart requested");
            Timer::after(timings.loop_idle()).await;
            esp_hal::system::software_reset();
        }
        Timer::after(timings.loop_idle()).await;
    }
}
