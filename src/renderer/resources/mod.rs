pub mod camera_controller;

pub use camera_controller::CameraController;
