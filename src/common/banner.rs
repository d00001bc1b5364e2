use colored::*;

pub fn show() {
    let banner = r#"
     ██████╗██████╗ ███████╗██████╗ ███████╗ ██████╗ █████╗ ███╗   ██╗
    ██╔════╝██╔══██╗██╔════╝██╔══██╗██╔════╝██╔════╝██╔══██╗████╗  ██║
    ██║     ██████╔╝█████╗  ██║  ██║███████╗██║     ███████║██╔██╗ ██║
    ██║     ██╔══██╗██╔══╝  ██║  ██║╚════██║██║     ██╔══██║██║╚██╗██║
    ╚██████╗██║  ██║███████╗██████╔╝███████║╚██████╗██║  ██║██║ ╚████║
     ╚═════╝╚═╝  ╚═╝╚══════╝╚═════╝ ╚══════╝ ╚═════╝╚═╝  ╚═╝╚═╝  ╚═══╝
    "#;

    println!("{}", banner.bright_red());
    println!("    {}", "Multi-protocol network authentication scanner".bright_yellow());
    println!("    {}", "Protocols: ssh, winrm, smb, ldap, smtp, vnc, wmi".bright_yellow());
    println!("    {}", "Version: 0.1.0".bright_yellow());
    println!();
}
