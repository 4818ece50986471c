use tokio::sync::mpsc;

/// Merges `inputs` into one channel.
///
/// Every value from every input is forwarded; the output closes once all
/// inputs are closed and drained. Values from a single input keep their
/// order, interleaving across inputs is unspecified. Must be called inside a
/// Tokio runtime.
pub fn fan_in<T: Send + 'static>(inputs: Vec<mpsc::Receiver<T>>) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(inputs.len().max(1));
    for mut input in inputs {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}
