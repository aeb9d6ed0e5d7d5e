//! Traffic indicator LED.

use embassy_stm32::gpio::Output;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Timer;

static ACTIVITY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Records traffic. Never blocks; the LED task picks it up on its next cycle.
pub fn flash() {
    ACTIVITY.signal(());
}

/// Drives the activity LED. Each burst of traffic lights the LED for a minimum visible
/// period, with a short dark gap after so continuous traffic reads as blinking rather than a
/// solid light.
#[embassy_executor::task]
pub async fn activity_led_task(mut led: Output<'static>) -> ! {
    const ON_MS: u64 = 40;
    const OFF_MS: u64 = 20;
    loop {
        ACTIVITY.wait().await;
        led.set_high();
        Timer::after_millis(ON_MS).await;
        led.set_low();
        Timer::after_millis(OFF_MS).await;
    }
}
