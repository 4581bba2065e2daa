use crossbeam_channel::{Receiver, Sender, bounded};
use ethereum_types::Address;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Liveness statistics of one closed call frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLog {
    pub block: u64,
    pub tx_index: usize,
    pub depth: usize,
    pub caller: Address,
    pub address: Address,
    pub total_inst: u64,
    pub live_inst: u64,
    pub total_gas: u64,
    pub live_gas: u64,
}

const CSV_HEADER: &str = "block,totalInst,liveInst,totalGas,liveGas,txIndex,depth,caller,self";
const SINK_BUFFER: usize = 1024;

/// Producer handle. Sends never block: when the sink is full or gone the
/// record is dropped rather than stalling the replayer.
#[derive(Debug, Clone)]
pub struct CallLogSender(Sender<CallLog>);

impl CallLogSender {
    pub fn send(&self, log: CallLog) {
        if self.0.try_send(log).is_err() {
            warn!("call log sink unavailable, dropping record");
        }
    }
}

/// Single-writer CSV sink draining [`CallLog`] records on its own thread.
/// Dropping every sender ends the stream; [`CallLogSink::close`] flushes and
/// joins the writer.
#[derive(Debug)]
pub struct CallLogSink {
    sender: Sender<CallLog>,
    done: Sender<()>,
    handle: JoinHandle<io::Result<()>>,
}

impl CallLogSink {
    pub fn spawn(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        let (sender, receiver) = bounded(SINK_BUFFER);
        let (done, done_receiver) = bounded(1);
        let handle = thread::Builder::new()
            .name("call-log-sink".into())
            .spawn(move || write_logs(file, receiver, done_receiver))?;
        Ok(CallLogSink {
            sender,
            done,
            handle,
        })
    }

    pub fn sender(&self) -> CallLogSender {
        CallLogSender(self.sender.clone())
    }

    /// Signals completion, waits for the writer to drain and flush. Any
    /// sender still alive afterwards degrades to dropping its records.
    pub fn close(self) -> io::Result<()> {
        let _ = self.done.send(());
        drop(self.sender);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(io::Error::other("call log sink writer panicked")),
        }
    }
}

fn write_logs(
    file: File,
    receiver: Receiver<CallLog>,
    done: Receiver<()>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{CSV_HEADER}")?;

    let mut write_row = |writer: &mut BufWriter<File>, log: CallLog| {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{:#x},{:#x}",
            log.block,
            log.total_inst,
            log.live_inst,
            log.total_gas,
            log.live_gas,
            log.tx_index,
            log.depth,
            log.caller,
            log.address,
        )
    };

    loop {
        crossbeam_channel::select! {
            recv(receiver) -> msg => match msg {
                Ok(log) => write_row(&mut writer, log)?,
                Err(_) => break,
            },
            recv(done) -> _ => break,
        }
    }
    // drain whatever producers managed to enqueue before the done signal
    while let Ok(log) = receiver.try_recv() {
        write_row(&mut writer, log)?;
    }
    writer.flush()
}
