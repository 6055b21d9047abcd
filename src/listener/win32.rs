//! Win32 message pump for the MAME output protocol
//!
//! A hidden window receives the emulator's registered messages and
//! `WM_COPYDATA` packets on a dedicated thread. The window procedure only
//! updates [`MameProtocol`] state and pushes onto the packet sink.

use super::mame::{MameMessage, MameProtocol, MameRequest};
use super::{PacketSink, PumpSource};
use crate::error::{PlynkError, Result};
use crossbeam_channel::bounded;
use std::cell::RefCell;
use std::sync::Once;
use std::thread::JoinHandle;
use std::time::Duration;
use windows::core::{s, PCSTR};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::LibraryLoader::GetModuleHandleA;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    ChangeWindowMessageFilterEx, CreateWindowExA, DefWindowProcA, DestroyWindow, DispatchMessageA,
    GetMessageA, PostMessageA, PostThreadMessageA, RegisterClassA, RegisterWindowMessageA,
    TranslateMessage, HMENU, HWND_BROADCAST, MSG, MSGFLT_ALLOW, WINDOW_EX_STYLE, WINDOW_STYLE,
    WM_COPYDATA, WM_QUIT, WNDCLASSA,
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Registered message ids of the protocol
#[derive(Debug, Clone, Copy)]
struct MessageIds {
    start: u32,
    stop: u32,
    register: u32,
    update: u32,
    get_id: u32,
    unregister: u32,
}

impl MessageIds {
    fn register() -> Self {
        unsafe {
            Self {
                start: RegisterWindowMessageA(s!("MAMEOutputStart")),
                stop: RegisterWindowMessageA(s!("MAMEOutputStop")),
                register: RegisterWindowMessageA(s!("MAMEOutputRegister")),
                update: RegisterWindowMessageA(s!("MAMEOutputUpdateState")),
                get_id: RegisterWindowMessageA(s!("MAMEOutputGetIDString")),
                unregister: RegisterWindowMessageA(s!("MAMEOutputUnregister")),
            }
        }
    }

    fn all(&self) -> [u32; 7] {
        [
            WM_COPYDATA,
            self.start,
            self.stop,
            self.register,
            self.update,
            self.get_id,
            self.unregister,
        ]
    }
}

struct PumpState {
    sink: PacketSink,
    ids: MessageIds,
    protocol: MameProtocol,
    emulator: HWND,
}

thread_local! {
    static STATE: RefCell<Option<PumpState>> = const { RefCell::new(None) };
}

impl PumpState {
    fn translate<'a>(&mut self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> Option<MameMessage<'a>> {
        if msg == WM_COPYDATA {
            // SAFETY: the sender keeps the COPYDATASTRUCT alive for the duration of the call
            let data = unsafe { (lparam.0 as *const COPYDATASTRUCT).as_ref()? };
            let bytes = if data.lpData.is_null() || data.cbData == 0 {
                &[][..]
            } else {
                unsafe { std::slice::from_raw_parts(data.lpData as *const u8, data.cbData as usize) }
            };
            return Some(MameMessage::CopyData {
                kind: data.dwData,
                bytes,
            });
        }

        let ids = self.ids;
        if msg == ids.start {
            self.emulator = HWND(wparam.0 as isize);
            Some(MameMessage::Start)
        } else if msg == ids.stop {
            Some(MameMessage::Stop)
        } else if msg == ids.register {
            Some(MameMessage::Register { id: lparam.0 as u32 })
        } else if msg == ids.update {
            Some(MameMessage::Update {
                id: wparam.0 as u32,
                value: lparam.0 as i32,
            })
        } else if msg == ids.unregister {
            Some(MameMessage::Unregister { id: lparam.0 as u32 })
        } else {
            None
        }
    }

    fn handle(&mut self, hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> Option<LRESULT> {
        let message = self.translate(msg, wparam, lparam)?;
        let reaction = self.protocol.handle(message);
        for payload in reaction.payloads {
            self.sink.push(payload);
        }
        for request in reaction.requests {
            self.post(hwnd, request);
        }
        Some(LRESULT(if msg == WM_COPYDATA { 1 } else { 0 }))
    }

    /// Post a request both as a broadcast and directly to the emulator
    fn post(&self, hwnd: HWND, request: MameRequest) {
        let (msg, id) = match request {
            MameRequest::Register => (self.ids.register, 0),
            MameRequest::IdString(id) => (self.ids.get_id, id),
        };
        let wparam = WPARAM(hwnd.0 as usize);
        let lparam = LPARAM(id as isize);
        unsafe {
            let _ = PostMessageA(HWND_BROADCAST, msg, wparam, lparam);
            if self.emulator.0 != 0 {
                let _ = PostMessageA(self.emulator, msg, wparam, lparam);
            }
        }
    }
}

unsafe extern "system" fn wndproc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let handled = STATE.with(|cell| {
        let mut slot = cell.try_borrow_mut().ok()?;
        slot.as_mut()?.handle(hwnd, msg, wparam, lparam)
    });
    match handled {
        Some(result) => result,
        None => unsafe { DefWindowProcA(hwnd, msg, wparam, lparam) },
    }
}

fn create_window(ids: &MessageIds) -> Result<HWND> {
    static REGISTER_CLASS: Once = Once::new();
    let module = unsafe { GetModuleHandleA(PCSTR::null()) }
        .map_err(|e| PlynkError::State(format!("GetModuleHandle failed: {}", e)))?;

    REGISTER_CLASS.call_once(|| unsafe {
        let class = WNDCLASSA {
            lpfnWndProc: Some(wndproc),
            hInstance: module.into(),
            lpszClassName: s!("MAMEHooker"),
            ..Default::default()
        };
        RegisterClassA(&class);
    });

    let hwnd = unsafe {
        CreateWindowExA(
            WINDOW_EX_STYLE::default(),
            s!("MAMEHooker"),
            s!("PlynkIO Listener"),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            HWND::default(),
            HMENU::default(),
            module,
            None,
        )
    };
    if hwnd.0 == 0 {
        return Err(PlynkError::State("failed to create listener window".to_string()));
    }

    for msg in ids.all() {
        if unsafe { ChangeWindowMessageFilterEx(hwnd, msg, MSGFLT_ALLOW, None) }.is_err() {
            tracing::warn!("Could not allow message {} through UIPI", msg);
        }
    }
    Ok(hwnd)
}

fn run_pump(sink: PacketSink, ready: crossbeam_channel::Sender<Result<u32>>) {
    let ids = MessageIds::register();
    let hwnd = match create_window(&ids) {
        Ok(hwnd) => hwnd,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    STATE.with(|cell| {
        *cell.borrow_mut() = Some(PumpState {
            sink,
            ids,
            protocol: MameProtocol::new(),
            emulator: HWND::default(),
        });
    });
    let _ = ready.send(Ok(unsafe { GetCurrentThreadId() }));

    let mut msg = MSG::default();
    // GetMessage returns 0 on WM_QUIT and -1 on error
    while unsafe { GetMessageA(&mut msg, HWND::default(), 0, 0) }.0 > 0 {
        unsafe {
            TranslateMessage(&msg);
            DispatchMessageA(&msg);
        }
    }

    STATE.with(|cell| cell.borrow_mut().take());
    unsafe {
        let _ = DestroyWindow(hwnd);
    }
    tracing::debug!("MAME message pump exited");
}

/// Hidden-window source speaking the MAME output protocol
#[derive(Debug, Default)]
pub struct MamePump {
    thread: Option<(u32, JoinHandle<()>)>,
}

impl MamePump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PumpSource for MamePump {
    fn name(&self) -> &str {
        "mame-win32"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self, sink: PacketSink) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let (ready_tx, ready_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("plynk-mame-pump".to_string())
            .spawn(move || run_pump(sink, ready_tx))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                self.thread = Some((thread_id, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(PlynkError::State(
                "message pump did not start in time".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        let Some((thread_id, handle)) = self.thread.take() else {
            return;
        };
        if unsafe { PostThreadMessageA(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }.is_err() {
            tracing::warn!("Failed to post WM_QUIT to the message pump");
        }
        if handle.join().is_err() {
            tracing::error!("Message pump thread panicked");
        }
    }
}
