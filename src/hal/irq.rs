//! Threaded interrupts on top of the IDF per-pin ISR service.
//!
//! Each registration gets a worker thread. The ISR trampoline runs the hard
//! handler and, on [`IrqReturn::WakeThread`], sets a notification bit on the
//! worker. Bits are OR-ed, so edges arriving while the worker is busy
//! coalesce into one more run.
//!
//! Trampoline state lives in a static per-pin table that is never freed.
//! A slot's contents are only written while the slot is inactive and no
//! trampoline is inside it, so a trampoline already dispatched on the other
//! core when the handler is removed can never see freed memory.

use alloc::format;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::hint::spin_loop;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::hal::task::notification::{Notification, Notifier};
use esp_idf_svc::sys::{
    esp, esp_err_t, gpio_install_isr_service, gpio_int_type_t_GPIO_INTR_NEGEDGE,
    gpio_int_type_t_GPIO_INTR_POSEDGE, gpio_intr_disable, gpio_intr_enable, gpio_isr_handler_add,
    gpio_isr_handler_remove, gpio_set_intr_type, ESP_ERR_INVALID_STATE, ESP_ERR_NO_MEM, ESP_FAIL,
};

use crate::error::HalError;
use crate::irq::{Flags, Handler, IrqController, IrqNumber, IrqReturn, Pipeline, ThreadedHandler};

const EDGE_BIT: NonZeroU32 = NonZeroU32::MIN;
const STOP_BIT: NonZeroU32 = match NonZeroU32::new(2) {
    Some(bit) => bit,
    None => unreachable!(),
};

const WORKER_STACK_SIZE: usize = 4096;

/// GPIOs addressable by the ISR table.
const MAX_PINS: usize = 64;

struct IsrState {
    hard: Option<Arc<dyn Handler>>,
    notifier: Arc<Notifier>,
    oneshot: bool,
}

struct IsrSlot {
    active: AtomicBool,
    /// Trampolines currently inside this slot.
    firing: AtomicU32,
    state: UnsafeCell<Option<IsrState>>,
}

// SAFETY: `state` is written only while `active` is false and `firing` is
// zero; trampolines read it only between their `firing` increment and
// decrement, after seeing `active`.
unsafe impl Sync for IsrSlot {}

impl IsrSlot {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            firing: AtomicU32::new(0),
            state: UnsafeCell::new(None),
        }
    }

    /// Install `state` and open the slot to trampolines.
    fn activate(&self, state: IsrState) {
        // SAFETY: the slot is inactive and drained (fresh, or after retire).
        unsafe {
            *self.state.get() = Some(state);
        }
        self.active.store(true, Ordering::SeqCst);
    }

    /// Close the slot, wait out trampolines inside it, then drop its state.
    fn retire(&self) {
        self.active.store(false, Ordering::SeqCst);
        while self.firing.load(Ordering::SeqCst) != 0 {
            spin_loop();
        }
        // SAFETY: inactive and no trampoline inside.
        drop(unsafe { (*self.state.get()).take() });
    }
}

static ISR_SLOTS: [IsrSlot; MAX_PINS] = [const { IsrSlot::new() }; MAX_PINS];

unsafe extern "C" fn isr_trampoline(arg: *mut c_void) {
    let Some(slot) = ISR_SLOTS.get(arg as usize) else {
        return;
    };

    slot.firing.fetch_add(1, Ordering::SeqCst);
    if slot.active.load(Ordering::SeqCst) {
        // SAFETY: active and counted in `firing`, so the state is not
        // written until this trampoline leaves.
        if let Some(state) = unsafe { &*slot.state.get() } {
            let ret = match &state.hard {
                Some(hard) => hard.handle(),
                None => IrqReturn::WakeThread,
            };

            if ret == IrqReturn::WakeThread {
                // SAFETY: ISR context; both calls are documented ISR-safe.
                unsafe {
                    if state.oneshot {
                        gpio_intr_disable(arg as i32);
                    }
                    state.notifier.notify_and_yield(EDGE_BIT);
                }
            }
        }
    }
    slot.firing.fetch_sub(1, Ordering::SeqCst);
}

struct Registration {
    pin: i32,
    notifier: Arc<Notifier>,
    worker: Option<JoinHandle<()>>,
}

impl Registration {
    /// Close the ISR slot, stop the worker. The ISR handler must already be
    /// removed.
    fn retire(mut self) {
        ISR_SLOTS[self.pin as usize].retire();

        // SAFETY: task context; the worker task is alive until it sees STOP.
        unsafe {
            self.notifier.notify(STOP_BIT);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("IRQ worker panicked");
            }
        }
    }
}

/// [`IrqController`] for GPIO interrupts on ESP-IDF.
#[derive(Default)]
pub struct EspIrqController {
    service_installed: bool,
    registrations: HashMap<IrqNumber, Registration>,
}

impl EspIrqController {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_isr_service(&mut self) -> Result<(), HalError> {
        if self.service_installed {
            return Ok(());
        }
        // SAFETY: plain driver call; INVALID_STATE means another component
        // installed the service first, which is fine.
        let ret = unsafe { gpio_install_isr_service(0) };
        if ret != 0 && ret != ESP_ERR_INVALID_STATE as esp_err_t {
            return Err(HalError::Os(ret));
        }
        self.service_installed = true;
        Ok(())
    }

    fn spawn_worker(
        irq: IrqNumber,
        name: &'static str,
        threaded: Arc<dyn ThreadedHandler>,
        pin: i32,
        oneshot: bool,
    ) -> Result<(Arc<Notifier>, JoinHandle<()>), HalError> {
        let (tx, rx) = flume::bounded(1);

        let worker = thread::Builder::new()
            .name(format!("irq/{}-{}", irq, name))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let notification = Notification::new();
                if tx.send(notification.notifier()).is_err() {
                    return;
                }
                loop {
                    let bits = notification.wait(BLOCK).map_or(0, NonZeroU32::get);
                    if bits & EDGE_BIT.get() != 0 {
                        threaded.handle_threaded();
                        if oneshot {
                            // SAFETY: re-enables the pin masked by the trampoline.
                            unsafe {
                                gpio_intr_enable(pin);
                            }
                        }
                    }
                    if bits & STOP_BIT.get() != 0 {
                        break;
                    }
                }
            })
            .map_err(|_| HalError::Os(ESP_ERR_NO_MEM as esp_err_t))?;

        match rx.recv() {
            Ok(notifier) => Ok((notifier, worker)),
            Err(_) => {
                let _ = worker.join();
                Err(HalError::Os(ESP_FAIL))
            }
        }
    }
}

impl IrqController for EspIrqController {
    fn request_threaded_irq(
        &mut self,
        irq: IrqNumber,
        pipeline: Pipeline,
        flags: Flags,
        name: &'static str,
    ) -> Result<(), HalError> {
        if self.registrations.contains_key(&irq) {
            return Err(HalError::Busy);
        }
        let pin = i32::try_from(irq.0).map_err(|_| HalError::Invalid)?;
        if pin as usize >= MAX_PINS {
            return Err(HalError::Invalid);
        }
        self.ensure_isr_service()?;

        let oneshot = flags.contains(Flags::ONESHOT);
        let (hard, threaded) = match pipeline {
            Pipeline::Direct { hard, threaded } => (Some(hard), threaded),
            Pipeline::PreConsumed { threaded } => (None, threaded),
        };

        let (notifier, worker) = Self::spawn_worker(irq, name, threaded, pin, oneshot)?;
        ISR_SLOTS[pin as usize].activate(IsrState {
            hard,
            notifier: notifier.clone(),
            oneshot,
        });
        let registration = Registration { pin, notifier, worker: Some(worker) };

        let intr_type = if flags.contains(Flags::TRIGGER_FALLING) {
            gpio_int_type_t_GPIO_INTR_NEGEDGE
        } else {
            gpio_int_type_t_GPIO_INTR_POSEDGE
        };

        // SAFETY: the argument is the pin index into the static slot table.
        let installed = esp!(unsafe { gpio_set_intr_type(pin, intr_type) }).and_then(|_| {
            esp!(unsafe { gpio_isr_handler_add(pin, Some(isr_trampoline), pin as usize as *mut c_void) })
        });
        if let Err(err) = installed {
            registration.retire();
            return Err(err.into());
        }

        // SAFETY: handler installed above.
        if let Err(err) = esp!(unsafe { gpio_intr_enable(pin) }) {
            // SAFETY: removing the handler we just added.
            unsafe {
                gpio_isr_handler_remove(pin);
            }
            registration.retire();
            return Err(err.into());
        }

        self.registrations.insert(irq, registration);
        Ok(())
    }

    fn free_irq(&mut self, irq: IrqNumber) {
        let Some(registration) = self.registrations.remove(&irq) else {
            log::warn!("free_irq: IRQ {} not registered", irq);
            return;
        };

        // SAFETY: the pin was registered by this controller.
        unsafe {
            gpio_intr_disable(registration.pin);
            gpio_isr_handler_remove(registration.pin);
        }
        registration.retire();
    }

    fn relax(&self) {
        thread::yield_now();
    }
}
