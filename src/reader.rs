use std::io;

/// Read one line from stdin, without the trailing newline. Returns
/// `Ok(None)` at end of input.
///
/// This reads the raw descriptor one byte at a time instead of going through
/// `BufRead::read_line`, because the buffered reader retries EINTR
/// internally: a child notification arriving mid-read would then sit
/// unreported until the user pressed Enter. Here every interruption runs
/// `on_interrupt` (the reaper) and the read resumes.
pub fn read_line(mut on_interrupt: impl FnMut()) -> io::Result<Option<String>> {
    let mut line: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                byte.as_mut_ptr() as *mut libc::c_void,
                1,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                on_interrupt();
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            // End of input. A partial final line still counts as a line.
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
