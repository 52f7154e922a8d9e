//! Idle time for macOS using IOKit HIDIdleTime.

use anyhow::Result;
use core_foundation::base::TCFType;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use std::time::Duration;

use super::IdleProbe;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOServiceGetMatchingService(main_port: u32, matching: core_foundation::base::CFTypeRef)
        -> u32;
    fn IOServiceMatching(name: *const std::os::raw::c_char) -> core_foundation::base::CFTypeRef;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: core_foundation::string::CFStringRef,
        allocator: core_foundation::base::CFAllocatorRef,
        options: u32,
    ) -> core_foundation::base::CFTypeRef;
    fn IOObjectRelease(object: u32) -> i32;
}

/// Reads HIDIdleTime from the IOHIDSystem registry entry.
pub struct IdleClock;

impl IdleClock {
    pub fn connect() -> Result<Self> {
        let mut clock = IdleClock;
        clock
            .idle_time()
            .ok_or_else(|| anyhow::anyhow!("IOHIDSystem idle time not available"))?;
        Ok(clock)
    }
}

impl IdleProbe for IdleClock {
    fn idle_time(&mut self) -> Option<Duration> {
        unsafe {
            let service_name = std::ffi::CString::new("IOHIDSystem").ok()?;
            let matching = IOServiceMatching(service_name.as_ptr());
            if matching.is_null() {
                return None;
            }

            // Consumes the matching dictionary.
            let service = IOServiceGetMatchingService(0, matching);
            if service == 0 {
                return None;
            }

            let key = CFString::new("HIDIdleTime");
            let property = IORegistryEntryCreateCFProperty(
                service,
                key.as_concrete_TypeRef(),
                std::ptr::null(),
                0,
            );

            IOObjectRelease(service);

            if property.is_null() {
                return None;
            }

            let cf_number: CFNumber = CFNumber::wrap_under_create_rule(property as *mut _);
            let nanoseconds: i64 = cf_number.to_i64()?;

            Some(Duration::from_nanos(nanoseconds as u64))
        }
    }
}
