//! Remote command construction for the setup and monitor stages.
//!
//! Every interpolated value is shell-escaped; the monitor script itself is
//! passed through untouched so operators can supply arguments.

use shell_escape::unix::escape;

use crate::config::RemoteSettings;

/// Builds the clone-or-pull command for the remote checkout.
pub(crate) fn setup_command(remote: &RemoteSettings) -> String {
    let path = escape(remote.project_path.as_str().into());
    let url = escape(remote.git_repo_url.as_str().into());
    format!(
        concat!(
            "if [ ! -d {path} ]; then ",
            "echo 'Cloning repository...' && git clone {url} {path}; ",
            "else ",
            "echo 'Repository already exists. Pulling latest changes...' && cd {path} && git pull; ",
            "fi"
        ),
        path = path,
        url = url
    )
}

/// Builds the monitor invocation with the backend and region exported.
pub(crate) fn monitor_command(remote: &RemoteSettings, region: &str) -> String {
    let exports = [
        ("BACKEND_API_URL", remote.backend_url.as_str()),
        ("API_KEY", remote.backend_key.as_str()),
        ("REGION", region),
    ];

    let mut command = String::new();
    for (key, value) in exports {
        command.push_str("export ");
        command.push_str(key);
        command.push('=');
        command.push_str(escape(value.into()).as_ref());
        command.push_str("; ");
    }
    command.push_str("cd ");
    command.push_str(escape(remote.project_path.as_str().into()).as_ref());
    command.push_str(" && ");
    command.push_str(&remote.monitor_script);
    command
}
