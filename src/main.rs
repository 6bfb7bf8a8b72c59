#[rocket::launch]
fn launch() -> _ {
    mailbox_pipeline::rocket()
}
