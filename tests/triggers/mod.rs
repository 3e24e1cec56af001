mod manual;
mod size;
